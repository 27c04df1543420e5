// ABOUTME: Pure text logic shared by the Quill language server
// ABOUTME: Cursor window extraction, candidate cleaning, completion assembly, indentation helpers

pub mod assemble;
pub mod clean;
pub mod indent;
pub mod window;

pub use assemble::build_completion_items;
pub use clean::{CleanContext, clean_candidate};
pub use window::TextWindow;
