//! Task and async state-machine recognition during heap traversal.

use postmortem_report::FaultedTask;

use crate::reader::HeapReader;

/// `TASK_STATE_RAN_TO_COMPLETION` in the task state flags.
const RAN_TO_COMPLETION: i32 = 0x0100_0000;
/// `TASK_STATE_FAULTED`.
const FAULTED: i32 = 0x0020_0000;
/// `TASK_STATE_CANCELED`.
const CANCELED: i32 = 0x0040_0000;

/// Completion status derived from the state flags field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TaskStatus {
    RanToCompletion,
    Faulted,
    Canceled,
    Pending,
}

pub(crate) fn task_status(flags: i32) -> TaskStatus {
    if flags & RAN_TO_COMPLETION != 0 {
        TaskStatus::RanToCompletion
    } else if flags & FAULTED != 0 {
        TaskStatus::Faulted
    } else if flags & CANCELED != 0 {
        TaskStatus::Canceled
    } else {
        TaskStatus::Pending
    }
}

/// Recognizes `System.Threading.Tasks.Task` and closed generic
/// `Task`1<…>` instances.
pub(crate) fn is_task_type(type_name: &str) -> bool {
    type_name == "System.Threading.Tasks.Task"
        || type_name.starts_with("System.Threading.Tasks.Task`1<")
}

/// Recognizes compiler-generated async state machines by their
/// `Outer+<Method>d__N` naming shape.
pub(crate) fn is_state_machine_type(type_name: &str) -> bool {
    type_name.contains("+<") && type_name.contains(">d__")
}

/// Recognizes timer queue entries.
pub(crate) fn is_timer_type(type_name: &str) -> bool {
    type_name == "System.Threading.TimerQueueTimer"
}

/// Reads the exception details of a faulted task by walking
/// `m_contingentProperties → m_exceptionsHolder → m_faultException`.
///
/// Every step is best effort; unreadable links leave the fields empty.
pub(crate) fn faulted_task_details(heap: &dyn HeapReader, task_address: u64) -> FaultedTask {
    let mut details = FaultedTask {
        address: postmortem_common::format_hex_addr(task_address),
        exception_type: None,
        exception_message: None,
    };

    let Some(contingent) = heap.read_object_field(task_address, "m_contingentProperties") else {
        return details;
    };
    let Some(holder) = heap.read_object_field(contingent, "m_exceptionsHolder") else {
        return details;
    };
    let Some(exception) = heap.read_object_field(holder, "m_faultException") else {
        return details;
    };

    details.exception_type = heap.type_name(exception);
    details.exception_message = heap.read_string_field(exception, "_message");
    details
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_masks() {
        assert_eq!(task_status(0x0100_0000), TaskStatus::RanToCompletion);
        assert_eq!(task_status(0x0020_0000), TaskStatus::Faulted);
        assert_eq!(task_status(0x0040_0000), TaskStatus::Canceled);
        assert_eq!(task_status(0x0000_2000), TaskStatus::Pending);
        // completion wins over other bits
        assert_eq!(task_status(0x0120_0000), TaskStatus::RanToCompletion);
    }

    #[test]
    fn test_is_task_type() {
        assert!(is_task_type("System.Threading.Tasks.Task"));
        assert!(is_task_type(
            "System.Threading.Tasks.Task`1<System.Int32>"
        ));
        assert!(!is_task_type("System.Threading.Tasks.TaskScheduler"));
        assert!(!is_task_type("MyApp.Task"));
    }

    #[test]
    fn test_is_state_machine_type() {
        assert!(is_state_machine_type(
            "MyApp.Worker+<RunAsync>d__3"
        ));
        assert!(!is_state_machine_type("MyApp.Worker"));
        assert!(!is_state_machine_type("MyApp.Worker+<Closure>"));
    }
}
