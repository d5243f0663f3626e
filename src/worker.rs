use chrono::Local;
use log::{info, warn};
use std::{path::Path, time::Duration};
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, HostEntry};
use crate::debounce;
use crate::error::Error;
use crate::guard::RunGuard;
use crate::notify::{Notifier, TransitionEvent};
use crate::probe::{IcmpProber, Probe};
use crate::state::{StateMap, StateStore};

/// How one guarded invocation ended. Lock contention is an expected
/// outcome, not an error: another invocation is already monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    Completed,
    SkippedLockHeld,
}

/// Runs one monitoring invocation: a bounded number of probing rounds at
/// the configured cadence, under the run guard.
///
/// Each round probes every host sequentially in configuration order, feeds
/// the outcomes through the debounce logic, persists the whole state map,
/// and only then dispatches that round's transition events. A state save
/// failure aborts the invocation; probe and delivery failures never do.
pub async fn run_invocation(
    config: &Config,
    data_dir: &Path,
    token: CancellationToken,
) -> Result<InvocationStatus, Error> {
    let Some(_guard) = RunGuard::acquire(data_dir.join("monitor.lock"))? else {
        info!("Another invocation holds the lock, skipping this one");
        return Ok(InvocationStatus::SkippedLockHeld);
    };

    info!("Starting host monitoring invocation");
    info!("Poll interval: {} seconds", config.monitor.poll_interval_secs);
    info!("Offline threshold: {} consecutive failures", config.monitor.offline_threshold);
    info!(
        "Running {} rounds over {} hosts",
        config.monitor.rounds_per_invocation,
        config.hosts.len()
    );
    if config.hosts.is_empty() {
        warn!("No hosts configured, rounds will be empty");
    }

    let store = StateStore::new(data_dir.join("state.json"));
    let mut states = store.load();

    let prober = IcmpProber::new(Duration::from_secs(config.monitor.probe_timeout_secs))?;
    let notifier = Notifier::from_config(&config.channel);

    for round in 0..config.monitor.rounds_per_invocation {
        let events = run_round(
            &prober,
            &config.hosts,
            config.monitor.offline_threshold,
            &mut states,
        )
        .await;

        // Persist before dispatching: the stored transition is the source
        // of truth, notification is best-effort on top of it.
        store.save(&states)?;

        for event in &events {
            notifier.notify(event).await;
        }

        if round + 1 < config.monitor.rounds_per_invocation {
            select! {
                () = sleep(Duration::from_secs(config.monitor.poll_interval_secs)) => {},
                () = token.cancelled() => {
                    info!("Shutdown requested, ending invocation early");
                    break;
                }
            }
        }
    }

    info!("Monitoring invocation finished");
    Ok(InvocationStatus::Completed)
}

/// Probes every host once, in order, and collects the transitions the
/// debounce logic decides on. State entries are created lazily the first
/// time an address is seen.
async fn run_round(
    prober: &dyn Probe,
    hosts: &[HostEntry],
    offline_threshold: u32,
    states: &mut StateMap,
) -> Vec<TransitionEvent> {
    let mut events = Vec::new();

    for host in hosts {
        let outcome = prober.probe(&host.address).await;
        match outcome.latency_ms {
            Some(latency_ms) => info!("{}: UP ({latency_ms} ms)", host.address),
            None if outcome.reachable => info!("{}: UP", host.address),
            None => warn!("{}: DOWN", host.address),
        }

        let state = states.entry(host.address.clone()).or_default();
        if let Some(transition) = debounce::observe(state, outcome.reachable, offline_threshold) {
            info!("{}: transition {transition:?}", host.address);
            events.push(TransitionEvent {
                address: host.address.clone(),
                label: host.label.clone(),
                transition,
                timestamp: Local::now(),
            });
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, MonitorOptions};
    use crate::debounce::Transition;
    use crate::probe::ProbeOutcome;
    use crate::state::{HostState, Status};
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct ScriptedProber {
        reachable: HashSet<&'static str>,
    }

    #[async_trait]
    impl Probe for ScriptedProber {
        async fn probe(&self, address: &str) -> ProbeOutcome {
            if self.reachable.contains(address) {
                ProbeOutcome {
                    reachable: true,
                    latency_ms: Some(1),
                }
            } else {
                ProbeOutcome::unreachable()
            }
        }
    }

    fn hosts(addresses: &[&str]) -> Vec<HostEntry> {
        addresses
            .iter()
            .map(|address| HostEntry {
                address: (*address).to_string(),
                label: String::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_contended_invocation_skips_without_touching_state() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let holder = RunGuard::acquire(dir.path().join("monitor.lock"))
            .unwrap()
            .expect("Expected first acquire to succeed");

        let config = Config {
            monitor: MonitorOptions {
                poll_interval_secs: 1,
                offline_threshold: 1,
                probe_timeout_secs: 1,
                rounds_per_invocation: 1,
            },
            channel: ChannelConfig::Telegram {
                bot_token: Some("123456:abcdef".to_string()),
                chat_ids: vec!["111".to_string()],
            },
            hosts: hosts(&["10.0.0.1"]),
        };

        let status = run_invocation(&config, dir.path(), CancellationToken::new())
            .await
            .expect("Contention must not be an error");

        assert_eq!(status, InvocationStatus::SkippedLockHeld);
        assert!(
            !dir.path().join("state.json").exists(),
            "Skipped invocation must not touch the state store"
        );
        drop(holder);
    }

    #[tokio::test]
    async fn test_round_creates_states_lazily() {
        let prober = ScriptedProber {
            reachable: HashSet::from(["10.0.0.1"]),
        };
        let mut states = StateMap::new();

        let events = run_round(&prober, &hosts(&["10.0.0.1", "10.0.0.2"]), 3, &mut states).await;

        assert!(events.is_empty());
        assert_eq!(states["10.0.0.1"], HostState::default());
        assert_eq!(
            states["10.0.0.2"],
            HostState {
                failure_count: 1,
                status: Status::Up,
            }
        );
    }

    #[tokio::test]
    async fn test_events_follow_configuration_order() {
        let prober = ScriptedProber {
            reachable: HashSet::new(),
        };
        let mut states = StateMap::new();
        let host_list = hosts(&["b.example.com", "a.example.com", "c.example.com"]);

        let events = run_round(&prober, &host_list, 1, &mut states).await;

        let addresses: Vec<&str> = events.iter().map(|e| e.address.as_str()).collect();
        assert_eq!(
            addresses,
            vec!["b.example.com", "a.example.com", "c.example.com"]
        );
        assert!(events
            .iter()
            .all(|e| e.transition == Transition::Offline { failure_count: 1 }));
    }

    #[tokio::test]
    async fn test_outage_emits_one_event_across_rounds() {
        let down = ScriptedProber {
            reachable: HashSet::new(),
        };
        let up = ScriptedProber {
            reachable: HashSet::from(["10.0.0.1"]),
        };
        let host_list = hosts(&["10.0.0.1"]);
        let mut states = StateMap::new();

        assert!(run_round(&down, &host_list, 3, &mut states).await.is_empty());
        assert!(run_round(&down, &host_list, 3, &mut states).await.is_empty());

        let events = run_round(&down, &host_list, 3, &mut states).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].transition,
            Transition::Offline { failure_count: 3 }
        );

        // Still down, no event storm.
        assert!(run_round(&down, &host_list, 3, &mut states).await.is_empty());

        let events = run_round(&up, &host_list, 3, &mut states).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transition, Transition::Online);
        assert_eq!(states["10.0.0.1"], HostState::default());
    }
}
