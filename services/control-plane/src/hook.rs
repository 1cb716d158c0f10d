//! Status hook URLs handed to the job service

use url::Url;

use crate::error::{Error, Result};

/// Builds the callback URLs the job service reports status changes to.
#[derive(Debug, Clone)]
pub struct StatusHooks {
    base: Url,
}

impl StatusHooks {
    /// Hooks rooted at the externally reachable URL of this server
    pub fn new(mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base }
    }

    fn join(&self, path: &str) -> Result<String> {
        self.base
            .join(path)
            .map(String::from)
            .map_err(Error::internal)
    }

    /// Hook for a replication task
    pub fn task(&self, task_id: i64) -> Result<String> {
        self.join(&format!("service/notifications/tasks/{task_id}"))
    }

    /// Hook for an admin job
    pub fn admin_job(&self, id: i64) -> Result<String> {
        self.join(&format!("service/notifications/jobs/adminjob/{id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_keep_base_path() {
        let hooks = StatusHooks::new("http://core:8080/prefix".parse().unwrap());
        assert_eq!(
            hooks.task(4).unwrap(),
            "http://core:8080/prefix/service/notifications/tasks/4"
        );
        assert_eq!(
            hooks.admin_job(7).unwrap(),
            "http://core:8080/prefix/service/notifications/jobs/adminjob/7"
        );
    }
}
