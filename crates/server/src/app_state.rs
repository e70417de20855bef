use std::time::Duration;

use crate::jobs::JobTable;

pub(crate) struct AppState {
    pub(crate) jobs: JobTable,
    pub(crate) stage_duration: Duration,
}
