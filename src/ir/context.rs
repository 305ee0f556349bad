//! The compilation context: the ordered collection of functions plus the
//! data segment and per-context allocators. Every pass and analysis
//! receives the context (or a function taken from it) explicitly; there is
//! no global namespace.

use super::function::Function;
use super::operand::Label;
use crate::fx::FxIndexMap;
use crate::mem_allocator::MemoryAllocator;

/// Default scratch-memory arena handed to the allocator; the front-end can
/// override both numbers when it owns the memory layout.
pub const DEFAULT_MEM_SIZE: usize = 0x2000;
pub const DEFAULT_MEM_BASE: usize = 0x1000;

/// One item of a data section: raw bytes, or a reference to a label whose
/// final offset the assembler fills in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataItem {
    Bytes(Vec<u8>),
    Label(Label),
}

/// A named run of data items.
#[derive(Clone, Debug)]
pub struct DataSection {
    pub label: Label,
    pub items: Vec<DataItem>,
}

/// Holds the functions of one compilation unit.
pub struct Context {
    functions: FxIndexMap<Label, Function>,
    entry_function: Option<Label>,
    pub data_segment: Vec<DataSection>,
    pub mem_allocator: MemoryAllocator,
    last_label: u32,
}

impl Context {
    pub fn new() -> Self {
        Self {
            functions: FxIndexMap::default(),
            entry_function: None,
            data_segment: Vec::new(),
            mem_allocator: MemoryAllocator::new(DEFAULT_MEM_SIZE, DEFAULT_MEM_BASE),
            last_label: 0,
        }
    }

    /// Create and register a function. The first function becomes the
    /// entry function unless one is designated explicitly.
    pub fn create_function(&mut self, name: impl Into<String>) -> Label {
        let label = Label::new(name);
        assert!(
            !self.functions.contains_key(&label),
            "duplicate function {label}"
        );
        if self.entry_function.is_none() {
            self.entry_function = Some(label.clone());
        }
        self.functions
            .insert(label.clone(), Function::new(label.clone()));
        label
    }

    pub fn add_function(&mut self, func: Function) {
        if self.entry_function.is_none() {
            self.entry_function = Some(func.name.clone());
        }
        self.functions.insert(func.name.clone(), func);
    }

    pub fn remove_function(&mut self, label: &Label) -> Option<Function> {
        if self.entry_function.as_ref() == Some(label) {
            self.entry_function = None;
        }
        self.functions.shift_remove(label)
    }

    pub fn get_function(&self, label: &Label) -> Option<&Function> {
        self.functions.get(label)
    }

    pub fn get_function_mut(&mut self, label: &Label) -> Option<&mut Function> {
        self.functions.get_mut(label)
    }

    /// Temporarily take a function out of the context so a pass can hold
    /// `&mut Function` and `&mut Context` at once. Restore with
    /// [`Context::put_function`].
    pub fn take_function(&mut self, label: &Label) -> Option<Function> {
        let slot = self.functions.get_mut(label)?;
        let placeholder = Function::new(Label::new(format!("<taken {label}>")));
        Some(core::mem::replace(slot, placeholder))
    }

    pub fn put_function(&mut self, func: Function) {
        let slot = self
            .functions
            .get_mut(&func.name)
            .expect("returning a function the context does not know");
        *slot = func;
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn function_labels(&self) -> Vec<Label> {
        self.functions.keys().cloned().collect()
    }

    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    pub fn set_entry_function(&mut self, label: Label) {
        debug_assert!(self.functions.contains_key(&label));
        self.entry_function = Some(label);
    }

    pub fn entry_function(&self) -> Option<&Label> {
        self.entry_function.as_ref()
    }

    /// Generate a fresh label, optionally around a suffix hint.
    pub fn get_next_label(&mut self, suffix: &str) -> Label {
        self.last_label += 1;
        if suffix.is_empty() {
            Label::new(format!("label_{}", self.last_label))
        } else {
            Label::new(format!("{}_{}", suffix, self.last_label))
        }
    }

    /// Replace data-segment references to `old` with `new`. Called when a
    /// referenced block is split or renamed.
    pub fn rename_data_label(&mut self, old: &Label, new: &Label) {
        for section in &mut self.data_segment {
            for item in &mut section.items {
                if let DataItem::Label(l) = item {
                    if l == old {
                        *l = new.clone();
                    }
                }
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_function_is_entry() {
        let mut ctx = Context::new();
        let main = ctx.create_function("main");
        ctx.create_function("helper");
        assert_eq!(ctx.entry_function(), Some(&main));
        assert_eq!(ctx.num_functions(), 2);
    }

    #[test]
    fn take_and_put_roundtrip() {
        let mut ctx = Context::new();
        let main = ctx.create_function("main");
        let func = ctx.take_function(&main).unwrap();
        assert_eq!(func.name, main);
        ctx.put_function(func);
        assert!(ctx.get_function(&main).is_some());
    }

    #[test]
    fn data_labels_follow_renames() {
        let mut ctx = Context::new();
        ctx.data_segment.push(DataSection {
            label: Label::new("runtime"),
            items: vec![
                DataItem::Label(Label::new("target")),
                DataItem::Bytes(vec![0xfe]),
            ],
        });
        ctx.rename_data_label(&Label::new("target"), &Label::new("split"));
        assert_eq!(
            ctx.data_segment[0].items[0],
            DataItem::Label(Label::new("split"))
        );
    }
}
