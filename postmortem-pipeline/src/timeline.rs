//! The snapshot timeline: wait classification and blocked-chain
//! detection.

use std::collections::HashMap;

use postmortem_report::{
    BlockedChain, CrashReport, DeadlockCycle, StackSelection, ThreadActivity, Timeline,
    TimelineThread, WaitKind,
};

/// Maximum number of threads carried in the timeline.
const MAX_TIMELINE_THREADS: usize = 200;

/// Maximum ownership hops followed from one thread.
const MAX_CHAIN_HOPS: usize = 16;

/// Classifies the wait kind of a frame function, first match wins.
pub(crate) fn classify_wait(function: &str, is_managed: bool) -> Option<WaitKind> {
    let lowered = function.to_ascii_lowercase();

    if lowered.contains("monitor.wait") {
        return Some(WaitKind::Monitor);
    }
    if lowered.contains("waithandle")
        || lowered.contains("manualresetevent")
        || lowered.contains("autoresetevent")
    {
        return Some(WaitKind::Event);
    }
    if lowered.contains("thread.sleep") {
        return Some(WaitKind::Sleep);
    }
    if lowered.contains("join") {
        return Some(WaitKind::Join);
    }
    if lowered.contains("futex")
        || lowered.contains("pthread_cond_wait")
        || lowered.contains("waitforsingleobject")
    {
        return Some(WaitKind::NativeSyscall);
    }
    if lowered.contains("wait") && !lowered.contains("await") {
        return Some(if is_managed {
            WaitKind::Wait
        } else {
            WaitKind::NativeSyscall
        });
    }
    None
}

fn capture_reason(report: &CrashReport) -> Option<String> {
    if let Some(exception) = report.exception.as_ref() {
        if let Some(exception_type) = exception.exception_type.as_deref() {
            return Some(format!("exception {exception_type}"));
        }
    }
    if let Some(signal) = report.summary.signal.as_deref() {
        return Some(format!("signal {signal}"));
    }
    let stopped = report.faulting_thread().is_some_and(|thread| {
        thread
            .stop_reason
            .as_deref()
            .unwrap_or_default()
            .contains("SIGSTOP")
    });
    if stopped {
        return Some("stop signal (snapshot)".to_owned());
    }
    None
}

/// Builds the timeline from the finalized thread table and the
/// per-thread stack selection.
pub(crate) fn build(report: &CrashReport, selection: &[StackSelection]) -> Timeline {
    let selected: HashMap<&str, &StackSelection> = selection
        .iter()
        .map(|entry| (entry.thread_id.as_str(), entry))
        .collect();

    // the faulting thread is always carried, remaining slots fill in
    // list order
    let mut indices: Vec<usize> = (0..report.threads.threads.len())
        .take(MAX_TIMELINE_THREADS)
        .collect();
    if let Some(faulting) = report.threads.threads.iter().position(|t| t.is_faulting) {
        if !indices.contains(&faulting) {
            indices.pop();
            indices.push(faulting);
        }
    }

    let mut threads = Vec::with_capacity(indices.len());
    for index in indices {
        let thread = &report.threads.threads[index];
        let frame = selected
            .get(thread.thread_id.as_str())
            .and_then(|sel| thread.call_stack.get(sel.selected_index));

        let (activity, wait_kind, function) = match frame {
            Some(frame) if !frame.function.trim().is_empty() => {
                let wait = classify_wait(&frame.function, frame.is_managed);
                let activity = if wait.is_some() {
                    ThreadActivity::Waiting
                } else {
                    ThreadActivity::Running
                };
                (activity, wait, Some(frame.function.clone()))
            }
            _ => (ThreadActivity::Unknown, None, None),
        };

        threads.push(TimelineThread {
            thread_id: thread.thread_id.clone(),
            activity,
            wait_kind,
            function,
        });
    }

    let (blocked_chains, deadlocks) = chains_and_cycles(report);

    Timeline {
        version: 1,
        kind: "snapshot".to_owned(),
        capture_reason: capture_reason(report),
        threads,
        blocked_chains,
        deadlocks,
    }
}

/// Follows `waits` / `owned by` edges from each thread, recording
/// chains of length two or more; a revisited thread is a cycle.
fn chains_and_cycles(
    report: &CrashReport,
) -> (Option<Vec<BlockedChain>>, Option<Vec<DeadlockCycle>>) {
    let synchronization = report.synchronization.as_ref();

    if let Some(graph) = synchronization.and_then(|sync| sync.wait_graph.as_ref()) {
        let mut waits: HashMap<&str, &str> = HashMap::new();
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for edge in &graph.edges {
            match edge.label.as_str() {
                "waits" => {
                    waits.insert(edge.from.as_str(), edge.to.as_str());
                }
                "owned by" => {
                    owners.insert(edge.from.as_str(), edge.to.as_str());
                }
                _ => {}
            }
        }

        let mut chains = Vec::new();
        let mut cycles = Vec::new();
        let mut sources: Vec<&str> = waits.keys().copied().collect();
        sources.sort_unstable();

        for source in sources {
            let mut chain = vec![source.to_owned()];
            let mut current = source;
            let mut cycle = false;

            for _ in 0..MAX_CHAIN_HOPS {
                let Some(resource) = waits.get(current) else {
                    break;
                };
                let Some(owner) = owners.get(resource) else {
                    break;
                };
                if chain.iter().any(|seen| seen == owner) {
                    chain.push((*owner).to_owned());
                    cycle = true;
                    break;
                }
                chain.push((*owner).to_owned());
                current = owner;
            }

            if cycle {
                cycles.push(DeadlockCycle {
                    kind: "waitgraph-cycle".to_owned(),
                    thread_ids: chain.clone(),
                    confidence: 0.6,
                });
            }
            if chain.len() >= 2 {
                chains.push(BlockedChain { thread_ids: chain });
            }
        }

        let chains = (!chains.is_empty()).then_some(chains);
        let cycles = (!cycles.is_empty()).then_some(cycles);
        return (chains, cycles);
    }

    if let Some(deadlocks) = synchronization.and_then(|sync| sync.potential_deadlocks.as_ref()) {
        let cycles: Vec<DeadlockCycle> = deadlocks
            .iter()
            .map(|entry| DeadlockCycle {
                kind: "monitor-cycle".to_owned(),
                thread_ids: entry.thread_ids.clone(),
                confidence: 0.6,
            })
            .collect();
        return (None, (!cycles.is_empty()).then_some(cycles));
    }

    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmortem_common::Dialect;
    use postmortem_report::{SynchronizationAnalysis, ThreadInfo, WaitEdge, WaitGraph};

    #[test]
    fn test_classify_wait_matrix() {
        let cases = [
            ("System.Threading.Monitor.Wait", true, Some(WaitKind::Monitor)),
            ("WaitHandle.WaitOne", true, Some(WaitKind::Event)),
            ("ManualResetEventSlim.Wait", true, Some(WaitKind::Event)),
            ("Thread.Sleep", true, Some(WaitKind::Sleep)),
            ("Thread.Join", true, Some(WaitKind::Join)),
            ("__futex_abstimed_wait", false, Some(WaitKind::NativeSyscall)),
            ("pthread_cond_wait", false, Some(WaitKind::NativeSyscall)),
            ("NtWaitForSingleObject", false, Some(WaitKind::NativeSyscall)),
            ("SpinWait.SpinOnce.Wait", true, Some(WaitKind::Wait)),
            ("sem_wait", false, Some(WaitKind::NativeSyscall)),
            ("MoveNext.Await", true, None),
            ("ProcessRequest", false, None),
        ];

        for (function, managed, expected) in cases {
            assert_eq!(classify_wait(function, managed), expected, "{function}");
        }
    }

    fn wait_graph_report(edges: &[(&str, &str, &str)]) -> CrashReport {
        let mut report = CrashReport::new(Dialect::WinDbg);
        for id in ["t1", "t2", "t3"] {
            report.threads.threads.push(ThreadInfo {
                thread_id: id.to_owned(),
                ..Default::default()
            });
        }
        report.synchronization = Some(SynchronizationAnalysis {
            detected: true,
            wait_graph: Some(WaitGraph {
                edges: edges
                    .iter()
                    .map(|(from, label, to)| WaitEdge {
                        from: (*from).to_owned(),
                        label: (*label).to_owned(),
                        to: (*to).to_owned(),
                    })
                    .collect(),
            }),
            ..Default::default()
        });
        report
    }

    #[test]
    fn test_blocked_chain() {
        let report = wait_graph_report(&[
            ("t1", "waits", "lock-a"),
            ("lock-a", "owned by", "t2"),
        ]);
        let timeline = build(&report, &[]);

        let chains = timeline.blocked_chains.unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].thread_ids, vec!["t1", "t2"]);
        assert!(timeline.deadlocks.is_none());
    }

    #[test]
    fn test_waitgraph_cycle() {
        let report = wait_graph_report(&[
            ("t1", "waits", "lock-a"),
            ("lock-a", "owned by", "t2"),
            ("t2", "waits", "lock-b"),
            ("lock-b", "owned by", "t1"),
        ]);
        let timeline = build(&report, &[]);

        let deadlocks = timeline.deadlocks.unwrap();
        assert_eq!(deadlocks.len(), 2);
        assert_eq!(deadlocks[0].kind, "waitgraph-cycle");
        assert!((deadlocks[0].confidence - 0.6).abs() < 1e-9);
        assert_eq!(deadlocks[0].thread_ids, vec!["t1", "t2", "t1"]);
    }

    #[test]
    fn test_timeline_thread_cap_keeps_faulting() {
        let mut report = CrashReport::new(Dialect::Lldb);
        for i in 0..250 {
            report.threads.threads.push(ThreadInfo {
                thread_id: format!("{i}"),
                is_faulting: i == 240,
                ..Default::default()
            });
        }

        let timeline = build(&report, &[]);
        assert_eq!(timeline.threads.len(), MAX_TIMELINE_THREADS);
        assert!(timeline.threads.iter().any(|t| t.thread_id == "240"));
    }
}
