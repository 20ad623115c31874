use std::path::PathBuf;

use super_dimmer::logging;
use super_dimmer::settings::{default_settings_path, DimSettings};

fn settings_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_settings_path)
}

fn main() -> anyhow::Result<()> {
    let path = settings_path();
    let settings = DimSettings::load(&path)?;
    logging::init(settings.debug_logging, settings.log_file.clone());
    tracing::info!(path = %path.display(), "settings loaded");
    run(path, settings)
}

#[cfg(windows)]
fn run(path: PathBuf, settings: DimSettings) -> anyhow::Result<()> {
    use std::sync::mpsc::{self, RecvTimeoutError};
    use std::sync::Arc;
    use std::time::{Duration, Instant, SystemTime};
    use super_dimmer::dim::platform::{PointerHook, Win32Compositor, Win32WindowSource};
    use super_dimmer::dim::{Coordinator, DimContext, GridAnalyzer, WindowSource};
    use super_dimmer::settings::SettingsHandle;

    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    fn modified(path: &std::path::Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    let source = Arc::new(Win32WindowSource::new());
    let handle = SettingsHandle::new(settings.clone());
    let ctx = DimContext {
        source: source.clone(),
        analyzer: Arc::new(GridAnalyzer),
        settings: handle.clone(),
    };
    let coordinator = Coordinator::new(ctx, Win32Compositor::new)?;
    if settings.dimming_enabled {
        coordinator.start()?;
    }

    let (press_tx, press_rx) = mpsc::channel();
    let _hook = match PointerHook::install(press_tx) {
        Ok(hook) => Some(hook),
        Err(err) => {
            tracing::warn!(error = %err, "pointer hook unavailable; relying on focus polling");
            None
        }
    };

    let mut enabled = settings.dimming_enabled;
    let mut last_modified = modified(&path);
    let mut foreground = source.frontmost_window_id();
    loop {
        match press_rx.recv_timeout(POLL_INTERVAL) {
            Ok(at) => {
                let latest = press_rx.try_iter().last().unwrap_or(at);
                coordinator.on_pointer_press(latest);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(POLL_INTERVAL),
        }

        // keyboard focus changes have no press
        let current = source.frontmost_window_id();
        if current != foreground {
            foreground = current;
            coordinator.on_pointer_press(Instant::now());
        }

        let stamp = modified(&path);
        if stamp == last_modified {
            continue;
        }
        last_modified = stamp;
        let next = match DimSettings::load(&path) {
            Ok(next) => next,
            Err(err) => {
                tracing::warn!(error = %err, "settings reload failed; keeping previous values");
                continue;
            }
        };
        let wants = next.dimming_enabled;
        handle.replace(next);
        tracing::info!("settings reloaded");
        if wants && !enabled {
            coordinator.start()?;
        } else if !wants && enabled {
            coordinator.stop();
        }
        enabled = wants;
    }
}

#[cfg(not(windows))]
fn run(_path: PathBuf, _settings: DimSettings) -> anyhow::Result<()> {
    tracing::error!("no overlay backend for this platform");
    anyhow::bail!("super_dimmer needs a Windows desktop")
}
