pub mod container;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod paths;
pub mod state;
pub mod tenancy;

pub use events::{Event, EventEmitter};
pub use jobs::{CalloutJob, ImageGenJob, LayoutJob, MetadataJob, TilesJob};
pub use paths::{sheet_id, sheet_index};
pub use state::{CoordinatorState, Progress, StageProgress, Status};
pub use tenancy::TenantKey;
