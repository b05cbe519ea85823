//! Pulse - demo application exercising commands and subscriptions

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use futures::stream;

use crate::config::DemoConfig;
use crate::core::{Application, Command, FatalSignal, Subscription, TaskFailure};

const MAX_LOG_LINES: usize = 8;

#[derive(Debug, Clone)]
pub enum Message {
    Tick(Instant),
    Heartbeat(u64),
    JobFinished { name: String, elapsed: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub status: JobStatus,
}

pub struct Pulse {
    config: DemoConfig,
    started: Instant,
    pub ticks: u64,
    pub heartbeats: u64,
    pub heartbeat_enabled: bool,
    pub jobs: Vec<Job>,
    log: VecDeque<String>,
}

impl Pulse {
    fn push_log(&mut self, line: impl Into<String>) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(line.into());
    }

    fn set_job(&mut self, name: &str, status: JobStatus) {
        if let Some(job) = self.jobs.iter_mut().find(|job| job.name == name) {
            job.status = status;
        }
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.config.tick_ms)
    }
}

fn sleep_job(name: String, length: Duration) -> Command<Message> {
    Command::perform(
        async move {
            let start = Instant::now();
            tokio::time::sleep(length).await;
            start.elapsed()
        },
        move |elapsed| Message::JobFinished { name, elapsed },
    )
}

fn failing_job(name: String) -> Command<Message> {
    Command::try_perform(
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err::<Duration, _>(anyhow::anyhow!("{name}: upstream unavailable"))
        },
        |elapsed| Message::JobFinished {
            name: String::from("unreachable"),
            elapsed,
        },
    )
}

impl Application for Pulse {
    type Message = Message;
    type Flags = DemoConfig;

    fn new(config: DemoConfig) -> (Self, Command<Message>) {
        let mut jobs = Vec::new();
        let mut commands = Vec::new();

        for (i, ms) in config.jobs_ms.iter().enumerate() {
            let name = format!("job-{}", i + 1);
            jobs.push(Job {
                name: name.clone(),
                status: JobStatus::Running,
            });
            commands.push(sleep_job(name, Duration::from_millis(*ms)));
        }
        if config.fail_job {
            let name = String::from("flaky");
            jobs.push(Job {
                name: name.clone(),
                status: JobStatus::Running,
            });
            commands.push(failing_job(name));
        }

        let app = Self {
            config,
            started: Instant::now(),
            ticks: 0,
            heartbeats: 0,
            heartbeat_enabled: true,
            jobs,
            log: VecDeque::new(),
        };
        (app, Command::batch(commands))
    }

    fn title(&self) -> String {
        format!("Pulse ({} ticks)", self.ticks)
    }

    fn update(&mut self, message: Message) -> Command<Message> {
        match message {
            Message::Tick(_) => {
                self.ticks += 1;
                let every = self.config.heartbeat_toggle_every;
                if every > 0 && self.ticks % every == 0 {
                    self.heartbeat_enabled = !self.heartbeat_enabled;
                    let state = if self.heartbeat_enabled { "on" } else { "off" };
                    self.push_log(format!("heartbeat {state}"));
                }
                if self.config.fatal_after == Some(self.ticks) {
                    return Command::fatal(FatalSignal::new(70, "fatal demo requested"));
                }
                Command::none()
            }
            Message::Heartbeat(n) => {
                self.heartbeats = n;
                Command::none()
            }
            Message::JobFinished { name, elapsed } => {
                self.set_job(&name, JobStatus::Done);
                self.push_log(format!("{name} finished after {} ms", elapsed.as_millis()));
                Command::none()
            }
        }
    }

    fn on_failure(&mut self, failure: TaskFailure) -> Command<Message> {
        tracing::warn!(%failure, "job failed");
        let text = format!("{:#}", failure.error());
        if let Some(name) = text.split(':').next() {
            let name = name.to_string();
            self.set_job(&name, JobStatus::Failed);
        }
        self.push_log(format!("failed: {text}"));
        Command::none()
    }

    fn view(&self) -> String {
        let mut lines = vec![
            format!(
                "Clock      {}",
                chrono::Local::now().format("%H:%M:%S")
            ),
            format!("Uptime     {:.1}s", self.started.elapsed().as_secs_f64()),
            format!("Ticks      {}", self.ticks),
            format!(
                "Heartbeat  {} ({})",
                self.heartbeats,
                if self.heartbeat_enabled { "on" } else { "off" }
            ),
            String::new(),
            String::from("Jobs"),
        ];
        for job in &self.jobs {
            let status = match job.status {
                JobStatus::Running => "running",
                JobStatus::Done => "done",
                JobStatus::Failed => "failed",
            };
            lines.push(format!("  {:<8} {status}", job.name));
        }
        lines.push(String::new());
        lines.push(String::from("Log"));
        lines.extend(self.log.iter().map(|line| format!("  {line}")));
        lines.join("\n")
    }

    fn subscriptions(&self) -> Subscription<Message> {
        let clock = match Subscription::every("clock", self.tick_interval(), Message::Tick) {
            Ok(clock) => clock,
            Err(err) => {
                tracing::warn!(error = %err, "clock disabled");
                Subscription::none()
            }
        };
        if !self.heartbeat_enabled {
            return clock;
        }

        let heartbeat = Subscription::run_with_id("heartbeat", || {
            stream::unfold(0u64, |n| async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Some((Message::Heartbeat(n + 1), n + 1))
            })
        });
        Subscription::batch([clock, heartbeat])
    }

    fn should_exit(&self) -> bool {
        self.config
            .max_ticks
            .is_some_and(|max_ticks| self.ticks >= max_ticks)
    }
}
