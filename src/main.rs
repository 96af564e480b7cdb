use std::env;

use multiparse::runner::{run_file, run_prompt};

pub fn main() -> std::io::Result<()> {
    let args: Vec<String> = env::args().collect();
    // args always includes the program name in args[0]
    match args.len() {
        1 => run_prompt(),
        2 => run_file(&args[1]).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
        _ => {
            println!("Usage: multiparse [script]");
            std::process::exit(64);
        }
    }
}
