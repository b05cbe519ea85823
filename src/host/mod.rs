//! Host shell - drives an [`Application`] from a single thread
//!
//! The shell owns the application and the bridge handle. Each cycle drains
//! the mailbox and calls `update` once per message, submits whatever work
//! comes back, reconciles subscriptions, and renders the view.

use std::time::Duration;

use crate::config::HostConfig;
use crate::core::{Application, Command};
use crate::infrastructure::runtime::{BridgeError, BridgeHandle, Delivery, Payload};

/// Input observed by a frontend between cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    None,
    Quit,
}

/// Where the view ends up
pub trait Frontend {
    fn render(&mut self, title: &str, view: &str) -> anyhow::Result<()>;

    /// Non-blocking input check.
    fn poll_input(&mut self) -> anyhow::Result<Input> {
        Ok(Input::None)
    }
}

/// Records every distinct frame; optionally echoes it to stdout
#[derive(Debug, Default)]
pub struct HeadlessFrontend {
    frames: Vec<String>,
    echo: bool,
}

impl HeadlessFrontend {
    pub fn new(echo: bool) -> Self {
        Self {
            frames: Vec::new(),
            echo,
        }
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&str> {
        self.frames.last().map(String::as_str)
    }
}

impl Frontend for HeadlessFrontend {
    fn render(&mut self, title: &str, view: &str) -> anyhow::Result<()> {
        if self.last_frame() == Some(view) {
            return Ok(());
        }
        if self.echo {
            println!("== {title} ==\n{view}");
        }
        self.frames.push(view.to_string());
        Ok(())
    }
}

/// Result of a single cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub messages: usize,
    pub failures: usize,
    pub submitted: usize,
    pub exit: bool,
}

/// Totals reported when the shell stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShellExit {
    pub cycles: u64,
    pub messages: u64,
    pub failures: u64,
}

pub struct Shell<A: Application> {
    app: A,
    bridge: BridgeHandle<A::Message>,
    config: HostConfig,
    totals: ShellExit,
}

impl<A: Application> Shell<A> {
    /// Build the application and submit its startup command.
    pub fn new(
        flags: A::Flags,
        bridge: BridgeHandle<A::Message>,
        config: HostConfig,
    ) -> Result<Self, BridgeError> {
        let (app, command) = A::new(flags);
        let mut shell = Self {
            app,
            bridge,
            config,
            totals: ShellExit::default(),
        };
        shell.submit(command)?;
        Ok(shell)
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn bridge(&self) -> &BridgeHandle<A::Message> {
        &self.bridge
    }

    /// Run one update/subscriptions/view cycle.
    pub fn cycle(&mut self, frontend: &mut dyn Frontend) -> anyhow::Result<CycleReport> {
        let mut report = CycleReport::default();
        for delivery in self.bridge.mailbox().drain() {
            self.dispatch(delivery, &mut report)?;
        }
        self.finish_cycle(frontend, report)
    }

    /// Cycle until the application or the frontend asks to stop, then
    /// shut the bridge down.
    pub fn run(mut self, frontend: &mut dyn Frontend) -> anyhow::Result<ShellExit> {
        loop {
            let report = self.cycle(frontend)?;
            if report.exit || frontend.poll_input()? == Input::Quit {
                break;
            }

            if let Some(delivery) = self.bridge.mailbox().recv_timeout(self.config.tick()) {
                let mut report = CycleReport::default();
                self.dispatch(delivery, &mut report)?;
                for delivery in self.bridge.mailbox().drain() {
                    self.dispatch(delivery, &mut report)?;
                }
                if self.finish_cycle(frontend, report)?.exit {
                    break;
                }
            }
        }

        self.bridge.shutdown()?;
        tracing::info!(
            cycles = self.totals.cycles,
            messages = self.totals.messages,
            failures = self.totals.failures,
            "shell stopped"
        );
        Ok(self.totals)
    }

    fn dispatch(
        &mut self,
        delivery: Delivery<A::Message>,
        report: &mut CycleReport,
    ) -> Result<(), BridgeError> {
        let command = match delivery.payload {
            Payload::Message(message) => {
                report.messages += 1;
                self.app.update(message)
            }
            Payload::Empty => return Ok(()),
            Payload::Failed(failure) => {
                report.failures += 1;
                self.app.on_failure(failure)
            }
            Payload::Fatal(signal) => {
                tracing::error!(origin = ?delivery.origin, %signal, "fatal signal reached host");
                return match self.bridge.shutdown() {
                    Err(err @ BridgeError::Fatal(_)) => Err(err),
                    _ => Err(BridgeError::Fatal(signal)),
                };
            }
        };
        report.submitted += self.submit(command)?;
        Ok(())
    }

    fn finish_cycle(
        &mut self,
        frontend: &mut dyn Frontend,
        mut report: CycleReport,
    ) -> anyhow::Result<CycleReport> {
        self.bridge.reconcile(self.app.subscriptions())?;
        frontend.render(&self.app.title(), &self.app.view())?;
        report.exit = self.app.should_exit();

        self.totals.cycles += 1;
        self.totals.messages += report.messages as u64;
        self.totals.failures += report.failures as u64;
        Ok(report)
    }

    fn submit(&mut self, command: Command<A::Message>) -> Result<usize, BridgeError> {
        let mut units = command.into_units();
        if self.config.max_batch > 0 && units.len() > self.config.max_batch {
            tracing::warn!(
                returned = units.len(),
                max_batch = self.config.max_batch,
                "dropping units of work beyond batch limit"
            );
            units.truncate(self.config.max_batch);
        }
        let count = units.len();
        for work in units {
            self.bridge.submit(work)?;
        }
        Ok(count)
    }
}

/// Wait helper used by tests and embedders that drive cycles by hand
pub fn settle<A: Application>(
    shell: &mut Shell<A>,
    frontend: &mut dyn Frontend,
    cycles: usize,
    pause: Duration,
) -> anyhow::Result<CycleReport> {
    let mut last = CycleReport::default();
    for _ in 0..cycles {
        last = shell.cycle(frontend)?;
        std::thread::sleep(pause);
    }
    Ok(last)
}
