pub mod b_plus_tree;
pub mod btree_iterator;
pub mod btree_page;
mod context;
pub mod header_page;
pub mod internal_page;
pub mod key_comparator;
pub mod leaf_page;

pub use b_plus_tree::{BPlusTree, BPlusTreeOptions, TreeStats};
pub use btree_iterator::BTreeIterator;
pub use btree_page::{BTreePage, BTreePageHeader, BTreePageRef, IndexPageType};
pub use header_page::{HeaderPage, HeaderPageMut, HeaderPageRef};
pub use internal_page::{InternalPage, InternalPageMut, InternalPageRef};
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator};
pub use leaf_page::{LeafPage, LeafPageMut, LeafPageRef};
