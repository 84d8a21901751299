pub mod party;
pub mod scene;

pub use party::{
    ActiveOverlayManager, DirectionalControl, KeyEvent, MembershipReconciler, PartyMember,
    PartyRegistry, PartyState, PartyTracker,
};
pub use scene::{MemoryScene, SceneHandles};
