//! OS signal classification.
//!
//! Every handled signal maps to a [`Policy`] through one fixed table.

use std::fmt;
use std::io;

use tokio::sync::mpsc;

/// How the process shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Drain servers and workers, then exit 0.
    Graceful,
    /// Stop everything without waiting, then exit 1.
    Immediate,
}

/// A handled OS signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// SIGHUP.
    Hangup,
    /// SIGQUIT.
    Quit,
    /// SIGUSR1.
    User1,
    /// SIGINT, or Ctrl-C off Unix.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGUSR2.
    User2,
}

/// Signal → policy.
pub const SIGNAL_POLICIES: [(Signal, Policy); 6] = [
    (Signal::Hangup, Policy::Graceful),
    (Signal::Quit, Policy::Graceful),
    (Signal::User1, Policy::Graceful),
    (Signal::Interrupt, Policy::Immediate),
    (Signal::Terminate, Policy::Immediate),
    (Signal::User2, Policy::Immediate),
];

impl Signal {
    /// Returns the shutdown policy for this signal.
    #[must_use]
    pub fn policy(self) -> Policy {
        SIGNAL_POLICIES
            .iter()
            .find(|(signal, _)| *signal == self)
            .map_or(Policy::Immediate, |(_, policy)| *policy)
    }

    /// Returns the conventional signal name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hangup => "SIGHUP",
            Self::Quit => "SIGQUIT",
            Self::User1 => "SIGUSR1",
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::User2 => "SIGUSR2",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stream of received signals.
#[derive(Debug)]
pub(crate) struct Signals {
    rx: mpsc::Receiver<Signal>,
}

impl Signals {
    /// Installs handlers for every signal in [`SIGNAL_POLICIES`].
    #[cfg(unix)]
    pub(crate) fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let (tx, rx) = mpsc::channel(8);
        for (sig, _) in SIGNAL_POLICIES {
            let kind = match sig {
                Signal::Hangup => SignalKind::hangup(),
                Signal::Quit => SignalKind::quit(),
                Signal::User1 => SignalKind::user_defined1(),
                Signal::Interrupt => SignalKind::interrupt(),
                Signal::Terminate => SignalKind::terminate(),
                Signal::User2 => SignalKind::user_defined2(),
            };
            let mut stream = signal(kind)?;
            let tx = tx.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if tx.send(sig).await.is_err() {
                        break;
                    }
                }
            });
        }
        Ok(Self { rx })
    }

    /// Installs a Ctrl-C handler.
    #[cfg(not(unix))]
    pub(crate) fn install() -> io::Result<Self> {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(Signal::Interrupt).await.is_err() {
                    break;
                }
            }
        });
        Ok(Self { rx })
    }

    /// Waits for the next signal.
    pub(crate) async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        assert_eq!(Signal::Hangup.policy(), Policy::Graceful);
        assert_eq!(Signal::Quit.policy(), Policy::Graceful);
        assert_eq!(Signal::User1.policy(), Policy::Graceful);
        assert_eq!(Signal::Interrupt.policy(), Policy::Immediate);
        assert_eq!(Signal::Terminate.policy(), Policy::Immediate);
        assert_eq!(Signal::User2.policy(), Policy::Immediate);
    }

    #[test]
    fn test_every_signal_appears_once() {
        for (signal, _) in SIGNAL_POLICIES {
            let count = SIGNAL_POLICIES.iter().filter(|(s, _)| *s == signal).count();
            assert_eq!(count, 1, "{signal} listed {count} times");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_and_receive() {
        let mut signals = Signals::install().unwrap();
        // Delivered through kill(1) to avoid raw libc calls
        let status = std::process::Command::new("kill")
            .args(["-USR1", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());
        let received = tokio::time::timeout(std::time::Duration::from_secs(5), signals.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(Signal::User1));
    }
}
