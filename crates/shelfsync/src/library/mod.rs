//! Materializes ranked recommendations as a media-server library folder.

pub mod artwork;
pub mod candidate;
pub mod naming;
pub mod nfo;
pub mod plan;
pub mod progress;
pub mod reconciler;
pub mod source;

pub use artwork::{HttpImageSource, ImageSource, NoImages};
pub use candidate::{LibraryOwner, RecommendationCandidate};
pub use plan::{plan, LibraryPlan, PlanOptions, PlannedItem};
pub use progress::{NoopProgress, ReconcileEvent, ReconcileProgress};
pub use reconciler::{LibraryReconciler, ReconcileReport, ReconcileRequest, ReconcileSummary};
pub use source::{CandidateSource, JsonDirectorySource, MemoryCandidateSource};
