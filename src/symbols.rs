use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::elf_items::BinaryImage;

/// Primary and legacy names of the pointer to the runtime debug structure.
pub const DEBUG_STRUCT_SYMBOLS: [&str; 2] = ["__rt_debug_struct_ptr", "debugStruct_ptr"];

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    Function,
    Data,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub kind: SymbolKind,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    // Map start_addr -> Symbol
    symbols_by_addr: BTreeMap<u64, Arc<Symbol>>,
    symbols_by_name: HashMap<String, Arc<Symbol>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first symbol inserted under a name wins, matching symbol table order.
    pub fn insert(&mut self, symbol: Symbol) {
        let arc_symbol = Arc::new(symbol);
        self.symbols_by_addr
            .entry(arc_symbol.address)
            .or_insert_with(|| arc_symbol.clone());
        self.symbols_by_name
            .entry(arc_symbol.name.clone())
            .or_insert(arc_symbol);
    }

    /// Find the symbol that contains the given address
    pub fn lookup(&self, address: u64) -> Option<&Symbol> {
        let (&start_addr, symbol) = self.symbols_by_addr.range(..=address).next_back()?;
        let hit = if symbol.size == 0 {
            address == start_addr
        } else {
            address < start_addr + symbol.size
        };
        hit.then(|| symbol.as_ref())
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Symbol> {
        self.symbols_by_name.get(name).map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.symbols_by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols_by_name.is_empty()
    }
}

/// Name lookups across every loaded binary, in load order.
pub struct SymbolResolver<'a> {
    images: &'a [BinaryImage],
}

impl<'a> SymbolResolver<'a> {
    pub fn new(images: &'a [BinaryImage]) -> Self {
        Self { images }
    }

    /// Address of the first symbol called `name`, or 0 when no binary defines it.
    pub fn resolve(&self, name: &str) -> u32 {
        self.images
            .iter()
            .find_map(|image| image.symbols.get_by_name(name))
            .map(|symbol| symbol.address as u32)
            .unwrap_or(0)
    }

    /// Tries each candidate in turn; 0 only once all of them are exhausted.
    pub fn resolve_first(&self, names: &[&str]) -> u32 {
        names
            .iter()
            .map(|name| self.resolve(name))
            .find(|&addr| addr != 0)
            .unwrap_or(0)
    }

    /// Location of the structure the runtime uses to exchange I/O requests with the bridge.
    pub fn resolve_debug_struct(&self) -> u32 {
        self.resolve_first(&DEBUG_STRUCT_SYMBOLS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn image(path: &str, symbols: &[(&str, u64)]) -> BinaryImage {
        let mut table = SymbolTable::new();
        for (name, address) in symbols {
            table.insert(Symbol {
                name: name.to_string(),
                address: *address,
                size: 4,
                kind: SymbolKind::Data,
            });
        }
        BinaryImage {
            path: PathBuf::from(path),
            entry: 0,
            segments: Vec::new(),
            symbols: table,
        }
    }

    #[test]
    fn unknown_symbol_resolves_to_zero() {
        let images = vec![image("a.elf", &[("main", 0x100)])];
        assert_eq!(SymbolResolver::new(&images).resolve("missing"), 0);
        assert_eq!(SymbolResolver::new(&[]).resolve("main"), 0);
    }

    #[test]
    fn first_binary_in_load_order_wins() {
        let images = vec![
            image("a.elf", &[("shared", 0x100)]),
            image("b.elf", &[("shared", 0x200), ("only_b", 0x300)]),
        ];
        let resolver = SymbolResolver::new(&images);
        assert_eq!(resolver.resolve("shared"), 0x100);
        assert_eq!(resolver.resolve("only_b"), 0x300);
    }

    #[test]
    fn debug_struct_falls_back_to_legacy_name() {
        let images = vec![
            image("a.elf", &[("main", 0x100)]),
            image("b.elf", &[("debugStruct_ptr", 0x1c00_0400)]),
        ];
        assert_eq!(
            SymbolResolver::new(&images).resolve_debug_struct(),
            0x1c00_0400
        );
    }

    #[test]
    fn debug_struct_prefers_primary_name() {
        let images = vec![image(
            "a.elf",
            &[("debugStruct_ptr", 0x200), ("__rt_debug_struct_ptr", 0x100)],
        )];
        assert_eq!(SymbolResolver::new(&images).resolve_debug_struct(), 0x100);
    }

    #[test]
    fn debug_struct_missing_everywhere_is_zero() {
        let images = vec![image("a.elf", &[("main", 0x100)])];
        assert_eq!(SymbolResolver::new(&images).resolve_debug_struct(), 0);
    }

    #[test]
    fn lookup_by_address_respects_size() {
        let mut table = SymbolTable::new();
        table.insert(Symbol {
            name: "buf".into(),
            address: 0x1000,
            size: 0x10,
            kind: SymbolKind::Data,
        });
        assert_eq!(table.lookup(0x100f).map(|s| s.name.as_str()), Some("buf"));
        assert!(table.lookup(0x1010).is_none());
        assert!(table.lookup(0x0fff).is_none());
    }
}
