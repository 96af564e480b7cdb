mod symbol;

pub use symbol::{Reducer, Symbol, SymbolData, SymbolKind};
