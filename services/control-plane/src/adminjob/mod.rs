//! Administrative jobs: garbage collection and scan-all, run once or on a schedule.

mod coordinator;
mod model;
mod store;

pub use self::coordinator::{MANUAL_RUN_GUARD, ScheduleCoordinator};
pub use self::model::{
    AdminJob, AdminJobName, AdminJobStatus, AdminJobView, Schedule, ScheduleParam,
    ScheduleRequest, ScheduleType,
};
pub use self::store::{AdminJobQuery, AdminJobStore, MemoryAdminJobStore, RECENT_JOBS};
