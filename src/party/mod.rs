mod control;
mod geometry;
mod overlay;
mod reconciler;
mod registry;
mod state;
mod tracker;

pub use control::{Compass, ControlInput, DirectionalControl, KeyEvent};
pub use geometry::{dpi_scale, ring_center, ring_diameter, step_offset, RING_PADDING};
pub use overlay::ActiveOverlayManager;
pub use reconciler::MembershipReconciler;
pub use registry::PartyRegistry;
pub use state::{
    normalize, PartyMember, PartyState, MEMBER_FLAG_KEY, PARTY_STATE_KEY, RING_MARKER_KEY,
};
pub use tracker::PartyTracker;
