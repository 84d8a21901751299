mod item;
mod memory;
mod store;

pub use item::{Item, ItemId, ItemKind, Layer, RingStyle};
pub use memory::{MemoryItems, MemoryScene};
pub use store::{
    Grid, ItemMutator, ItemStore, MetadataMap, MetadataStore, NoticeLevel, Notifier, SceneHandles,
    SceneStatus, StoreError,
};
