//! Trigger deduplication and dispatch.
//!
//! Triggers are collected from every entity of a batch and dispatched once
//! the batch completes. `service-reload` triggers for the same unit merge
//! into one with their flags OR'd; other triggers are dispatched once per
//! entity that notified them.

use std::collections::HashSet;
use std::path::Path;

use fleet_exec::{Cmd, ServiceAction, Stream};
use fleet_meta::{PathRef, Trigger};
use tokio::io::AsyncWriteExt;

use crate::Result;
use crate::progress::{Breadcrumb, PendingTrigger, TriggerOrigin};
use crate::settings::Settings;
use crate::template::{Renderer, to_env};

/// Prefix of the environment variables exported to shell triggers.
pub const ENV_PREFIX: &str = "FLEET_";

/// Merge duplicate triggers, keeping the order of first notification.
pub fn dedup(pending: Vec<PendingTrigger>) -> Vec<PendingTrigger> {
    let mut merged: Vec<PendingTrigger> = Vec::with_capacity(pending.len());
    let mut seen = HashSet::new();

    for item in pending {
        if let Trigger::ServiceReload {
            service,
            restart,
            daemon_reload,
        } = &item.trigger
        {
            let (service, restart, daemon_reload) = (service.clone(), *restart, *daemon_reload);
            let existing = merged.iter_mut().find_map(|p| match &mut p.trigger {
                Trigger::ServiceReload {
                    service: s,
                    restart: r,
                    daemon_reload: d,
                } if *s == service => Some((r, d)),
                _ => None,
            });
            match existing {
                Some((r, d)) => {
                    *r |= restart;
                    *d |= daemon_reload;
                }
                None => merged.push(item),
            }
            continue;
        }

        if seen.insert((item.trigger.clone(), item.origin.entity.clone())) {
            merged.push(item);
        }
    }
    merged
}

/// Executes triggers on the host.
pub struct TriggerDispatcher<'a> {
    settings: &'a Settings,
    renderer: &'a dyn Renderer,
    log: Breadcrumb,
}

impl<'a> TriggerDispatcher<'a> {
    pub fn new(settings: &'a Settings, renderer: &'a dyn Renderer, log: Breadcrumb) -> Self {
        Self { settings, renderer, log }
    }

    /// Deduplicate and run every pending trigger. Failures are reported as
    /// warnings and never abort the remaining triggers.
    pub async fn dispatch_all(&self, pending: Vec<PendingTrigger>) -> usize {
        let pending = dedup(pending);
        let mut failed = 0;
        for item in &pending {
            if let Err(e) = self.dispatch(item).await {
                failed += 1;
                let log = self.log.child(item.origin.entity.clone());
                log.warn(format!("{} trigger failed: {e}", item.trigger.discriminator()));
                tracing::warn!(entity = %item.origin.entity, trigger = ?item.trigger, error = %e, "trigger failed");
            }
        }
        failed
    }

    pub async fn dispatch(&self, item: &PendingTrigger) -> Result<()> {
        let log = self.log.child(item.origin.entity.clone()).child(item.trigger.discriminator());
        match &item.trigger {
            Trigger::ServiceReload {
                service,
                restart,
                daemon_reload,
            } => self.service_reload(service, *restart, *daemon_reload, &log).await,
            Trigger::Shell { command, quiet, sudo } => {
                self.shell(command, *quiet, *sudo, &item.origin, &log).await
            }
            Trigger::Message { message } => {
                log.info(self.renderer.render(message, &item.origin.context));
                Ok(())
            }
            Trigger::Gcode { gcode } => self.gcode(gcode, &log).await,
        }
    }

    async fn service_reload(&self, service: &str, restart: bool, daemon_reload: bool, log: &Breadcrumb) -> Result<()> {
        let privileged = self.settings.privileged();
        let mut sink = |_: Stream, line: &str| log.output(line);

        if daemon_reload {
            log.info("reloading systemd units...");
            privileged.daemon_reload().await?;
        }
        if restart {
            log.info(format!("restarting {service}..."));
            privileged.systemctl(ServiceAction::Restart, service, &mut sink).await?;
            return Ok(());
        }

        log.info(format!("reloading {service}..."));
        if let Err(e) = privileged.systemctl(ServiceAction::Reload, service, &mut sink).await {
            tracing::debug!(service, error = %e, "reload refused, restarting instead");
            privileged.systemctl(ServiceAction::Restart, service, &mut sink).await?;
        }
        Ok(())
    }

    async fn shell(
        &self,
        command: &PathRef,
        quiet: bool,
        sudo: bool,
        origin: &TriggerOrigin,
        log: &Breadcrumb,
    ) -> Result<()> {
        let cmd = match command {
            PathRef::Package(raw) => {
                let base = origin.package_path.as_deref().unwrap_or(&origin.workdir);
                Cmd::new("sh").arg(base.join(raw).display().to_string())
            }
            PathRef::Var(_) => match command.lookup(&origin.context) {
                Some(script) => Cmd::new("sh").arg(script),
                None => Cmd::new("sh").args(["-c", command.raw()]),
            },
            PathRef::Plain(raw) => Cmd::new("sh").args(["-c", raw.as_str()]),
        };
        let cmd = cmd
            .cwd(&origin.workdir)
            .envs(to_env(&origin.context, ENV_PREFIX));

        let mut sink = |_: Stream, line: &str| {
            if !quiet {
                log.output(line);
            }
        };
        if sudo {
            self.settings.privileged().run(cmd, &mut sink).await?;
        } else {
            self.settings.runner().run(&cmd, &mut sink).await?;
        }
        Ok(())
    }

    async fn gcode(&self, gcode: &str, log: &Breadcrumb) -> Result<()> {
        let pipe = &self.settings.control_pipe;
        if !is_writable_pipe(pipe) {
            log.warn(format!("Printer is not reachable, run {gcode} manually"));
            return Ok(());
        }
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(pipe)
            .await
            .map_err(|e| fleet_fs::Error::io(pipe, e))?;
        file.write_all(format!("{gcode}\n").as_bytes())
            .await
            .map_err(|e| fleet_fs::Error::io(pipe, e))?;
        log.info(format!("sent {gcode}"));
        Ok(())
    }
}

fn is_writable_pipe(path: &Path) -> bool {
    path.exists() && !path.is_dir()
}
