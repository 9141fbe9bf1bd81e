use indicatif::{ProgressBar, ProgressStyle};
use kiln_core::events::event::*;
use kiln_core::events::{EventChannel, EventConsumer};
use std::sync::Arc;
use tracing::debug;

trait Reporter {
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Noop => (),
            Event::QueueEvent(e) => self.on_queue_event(e),
            Event::CompileEvent(e) => self.on_compile_event(e),
            Event::WatcherEvent(e) => self.on_watcher_event(e),
            Event::ReloadEvent(e) => self.on_reload_event(e),
            Event::ServerEvent(e) => self.on_server_event(e),
        }
    }

    fn on_queue_event(&mut self, _event: QueueEvent) {}
    fn on_compile_event(&mut self, _event: CompileEvent) {}
    fn on_watcher_event(&mut self, _event: WatcherEvent) {}
    fn on_reload_event(&mut self, _event: ReloadEvent) {}
    fn on_server_event(&mut self, _event: ServerEvent) {}
}

/// Renders server events as a console progress view: one progress bar
/// counting compiles, one styled line per outcome.
pub struct StatusReporter {
    should_stop: bool,
    event_consumer: EventConsumer,
    queued: u64,
    completed: u64,
    error_count: u64,
    pb: ProgressBar,
}

impl StatusReporter {
    pub fn new(event_channel: Arc<EventChannel>) -> StatusReporter {
        let style = ProgressStyle::default_bar()
            .template("{prefix:>12.cyan.bold} [{bar:25}] {pos}/{len} {wide_msg}")
            .progress_chars("=> ");

        let pb = ProgressBar::new(0);
        pb.set_style(style);
        pb.set_prefix("Compiling");

        StatusReporter {
            should_stop: false,
            event_consumer: event_channel.consumer(),
            queued: 0,
            completed: 0,
            error_count: 0,
            pb,
        }
    }

    pub async fn run(mut self) {
        let handle = std::thread::spawn(move || loop {
            self.event_consumer.fetch();
            while let Some(event) = self.event_consumer.pop() {
                debug!("{:#?}", event);
                self.handle_event(event);
            }
            if self.should_stop {
                self.pb.finish_and_clear();
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        });
        while !handle.is_finished() {
            tokio::time::sleep(std::time::Duration::from_micros(10)).await;
        }
    }

    fn record_completion(&mut self) {
        self.completed += 1;
        self.pb.set_length(self.queued);
        self.pb.set_position(self.completed);
    }
}

impl Reporter for StatusReporter {
    fn on_queue_event(&mut self, event: QueueEvent) {
        let dim = console::Style::new().dim();
        match event {
            QueueEvent::RequestQueued { resource, origin } => {
                self.queued += 1;
                self.pb.set_length(self.queued);
                self.pb
                    .println(format!("{}", dim.apply_to(format!("Queued {resource} ({origin})"))));
            }
            QueueEvent::RequestDeduplicated { .. } => (),
            QueueEvent::RequestCancelled { resource } => {
                self.record_completion();
                self.pb
                    .println(format!("{}", dim.apply_to(format!("Cancelled {resource}"))));
            }
        }
    }

    fn on_compile_event(&mut self, event: CompileEvent) {
        let green_bold = console::Style::new().green().bold();
        let yellow = console::Style::new().yellow();
        let red_bold = console::Style::new().red().bold();
        let blue_dim = console::Style::new().blue();
        match event {
            CompileEvent::ResourceUpToDate { resource } => {
                self.record_completion();
                self.pb.println(format!(
                    "{:>12} {resource}",
                    blue_dim.apply_to("Up-to-date")
                ));
            }
            CompileEvent::CompileStarted { resource } => {
                self.pb.set_message(resource.to_string());
            }
            CompileEvent::CompileSucceeded {
                resource,
                warnings,
                elapsed,
            } => {
                self.record_completion();
                let elapsed = humantime::format_duration(
                    std::time::Duration::from_millis(elapsed.as_millis() as u64),
                );
                if warnings {
                    self.pb.println(format!(
                        "{:>12} {resource} in {elapsed} (with warnings)",
                        yellow.apply_to("Finished")
                    ));
                } else {
                    self.pb.println(format!(
                        "{:>12} {resource} in {elapsed}",
                        green_bold.apply_to("Finished")
                    ));
                }
            }
            CompileEvent::CompileFailed { resource, reason } => {
                self.record_completion();
                self.error_count += 1;
                self.pb.println(format!(
                    "{:>12} {resource}: {reason}",
                    red_bold.apply_to("Failed")
                ));
            }
            CompileEvent::CompileRetried { resource, attempt } => {
                self.pb.println(format!(
                    "{:>12} {resource} (retry {attempt})",
                    yellow.apply_to("Retrying")
                ));
            }
        }
    }

    fn on_watcher_event(&mut self, event: WatcherEvent) {
        let dim = console::Style::new().dim();
        match event {
            WatcherEvent::FileChanged { path } => {
                self.pb
                    .println(format!("{}", dim.apply_to(format!("Changed {path:?}"))));
            }
            WatcherEvent::ResourcesInvalidated { count } => {
                self.pb.println(format!(
                    "{}",
                    dim.apply_to(format!("Invalidated {count} resource(s)"))
                ));
            }
        }
    }

    fn on_reload_event(&mut self, event: ReloadEvent) {
        let dim = console::Style::new().dim();
        match event {
            ReloadEvent::UnloadRequested { resource } => {
                self.pb
                    .println(format!("{}", dim.apply_to(format!("Unloading {resource}"))));
            }
            ReloadEvent::ReloadReady { resource } => {
                self.pb.println(format!(
                    "{}",
                    dim.apply_to(format!("Ready to reload {resource}"))
                ));
            }
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Started { workers } => {
                self.pb
                    .println(format!("Serving with {workers} worker(s)"));
            }
            ServerEvent::ShuttingDown => {
                self.should_stop = true;
            }
        }
    }
}
