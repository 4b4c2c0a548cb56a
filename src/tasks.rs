use crate::dispatch::Operation;
use crate::error::Rejected;
use crate::remote::{ManagementApi, MoRef, TaskFilterSpec, TaskInfo, TaskRecursion, TaskState};
use crate::{log_debug, log_warn};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

pub const TASK_COLUMNS: [&str; 7] = [
    "Start Date",
    "State",
    "Description ID",
    "Start Time",
    "Complete Time",
    "Time to Complete",
    "Progress",
];

/// Point-in-time view of one remote task, rebuilt on every query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub task: MoRef,
    pub start_time: DateTime<Utc>,
    pub complete_time: Option<DateTime<Utc>>,
    pub state: TaskState,
    pub description_id: String,
    pub remote_progress: Option<u8>,
    pub error: Option<String>,
}

impl From<TaskInfo> for TaskRecord {
    fn from(info: TaskInfo) -> Self {
        Self {
            task: info.task,
            start_time: info.start_time,
            complete_time: info.complete_time,
            state: info.state,
            description_id: info.description_id,
            remote_progress: info.progress,
            error: info.error,
        }
    }
}

impl TaskRecord {
    /// Elapsed time once the task completed
    pub fn duration(&self) -> Option<Duration> {
        self.complete_time
            .map(|done| (done - self.start_time).max(Duration::zero()))
    }

    /// 100 once complete, otherwise the remote's in-progress percentage
    pub fn display_progress(&self) -> u8 {
        if self.complete_time.is_some() {
            100
        } else {
            self.remote_progress.unwrap_or(0).min(100)
        }
    }

    pub fn start_date(&self) -> String {
        self.start_time.date_naive().to_string()
    }

    pub fn start_clock(&self) -> String {
        format_clock(&self.start_time)
    }

    pub fn complete_clock(&self) -> Option<String> {
        self.complete_time.as_ref().map(format_clock)
    }

    /// The seven display columns, in [`TASK_COLUMNS`] order
    pub fn row(&self) -> [String; 7] {
        [
            self.start_date(),
            self.state.to_string(),
            self.description_id.clone(),
            self.start_clock(),
            self.complete_clock().unwrap_or_else(|| "0".to_string()),
            self.duration()
                .map(format_duration)
                .unwrap_or_else(|| "0".to_string()),
            self.display_progress().to_string(),
        ]
    }
}

/// Wall-clock time with sub-second precision stripped
pub fn format_clock(time: &DateTime<Utc>) -> String {
    time.format("%H:%M:%S").to_string()
}

/// `H:MM:SS`, prefixed with a day count when longer than a day.
/// Sub-second precision is dropped.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let clock = format!("{}:{:02}:{:02}", hours, minutes, seconds);
    match days {
        0 => clock,
        1 => format!("1 day, {}", clock),
        n => format!("{} days, {}", n, clock),
    }
}

/// Lists the remote tasks attached to one entity.
pub struct TaskReporter {
    api: Arc<dyn ManagementApi>,
    recursion: TaskRecursion,
}

impl TaskReporter {
    pub fn new(api: Arc<dyn ManagementApi>) -> Self {
        Self {
            api,
            recursion: TaskRecursion::SelfOnly,
        }
    }

    pub fn with_recursion(mut self, recursion: TaskRecursion) -> Self {
        self.recursion = recursion;
        self
    }

    pub async fn list_tasks(&self, entity: Option<&MoRef>) -> Result<Vec<TaskRecord>, Rejected> {
        let entity = entity.ok_or(Rejected::NoTargetSelected)?;
        let filter = TaskFilterSpec {
            entity: entity.clone(),
            recursion: self.recursion,
        };

        let tasks = self.api.collect_tasks(&filter).await.map_err(|e| {
            log_warn!("Task collection for {} failed: {}", entity, e);
            Rejected::remote(Operation::ListTasks, e)
        })?;
        log_debug!("Collected {} task(s) for {}", tasks.len(), entity);

        Ok(tasks.into_iter().map(TaskRecord::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ObjectKind;
    use chrono::TimeZone;

    fn record(complete_after: Option<i64>, progress: Option<u8>) -> TaskRecord {
        let start = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + Duration::milliseconds(250);
        TaskRecord {
            task: MoRef::new(ObjectKind::Task, "task-1"),
            start_time: start,
            complete_time: complete_after.map(|secs| start + Duration::seconds(secs)),
            state: if complete_after.is_some() {
                TaskState::Success
            } else {
                TaskState::Running
            },
            description_id: "VirtualMachine.powerOn".to_string(),
            remote_progress: progress,
            error: None,
        }
    }

    #[test]
    fn completed_task_reports_full_progress_and_duration() {
        let task = record(Some(90), Some(37));
        assert_eq!(task.display_progress(), 100);
        assert_eq!(task.duration().map(format_duration), Some("0:01:30".to_string()));
    }

    #[test]
    fn running_task_reports_remote_progress() {
        let task = record(None, Some(42));
        assert_eq!(task.display_progress(), 42);
        assert_eq!(task.duration(), None);
        assert_eq!(task.row()[5], "0");
        assert_eq!(task.row()[4], "0");
    }

    #[test]
    fn row_strips_sub_seconds() {
        let row = record(Some(3_725), None).row();
        assert_eq!(row[0], "2024-03-09");
        assert_eq!(row[1], "success");
        assert_eq!(row[2], "VirtualMachine.powerOn");
        assert_eq!(row[3], "14:05:07");
        assert_eq!(row[4], "15:07:12");
        assert_eq!(row[5], "1:02:05");
        assert_eq!(row[6], "100");
    }

    #[test]
    fn long_durations_count_days() {
        assert_eq!(format_duration(Duration::seconds(86_400 + 61)), "1 day, 0:01:01");
        assert_eq!(format_duration(Duration::seconds(3 * 86_400)), "3 days, 0:00:00");
        assert_eq!(format_duration(Duration::seconds(-5)), "0:00:00");
    }
}
