// Shader hot reload
//
// notify delivers events on its own thread; the render loop only looks at
// the last change time, once per frame. A compiler usually writes a file in
// several steps, so a change is reported only after the directory has been
// quiet for `SETTLE_TIME`.

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ShaderConfig;

const SETTLE_TIME: Duration = Duration::from_millis(200);

pub struct ShaderWatcher {
    last_change: Arc<Mutex<Option<Instant>>>,
    // Watching stops when this is dropped
    _watcher: RecommendedWatcher,
}

impl ShaderWatcher {
    pub fn new(shaders: &ShaderConfig) -> Result<Self> {
        let watched: Vec<OsString> = vec![
            shaders.vertex.clone().into(),
            shaders.fragment.clone().into(),
        ];
        let last_change = Arc::new(Mutex::new(None));

        let sink = last_change.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if touches_shader(&event, &watched) {
                    log::debug!("Shader change: {:?}", event.paths);
                    *sink.lock() = Some(Instant::now());
                }
            }
            Err(e) => log::warn!("Shader watch error: {}", e),
        })
        .context("Failed to create shader watcher")?;

        watcher
            .watch(&shaders.directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", shaders.directory))?;

        log::info!("Watching {:?} for shader changes", shaders.directory);

        Ok(Self {
            last_change,
            _watcher: watcher,
        })
    }

    /// True once per burst of changes, after the files have settled
    pub fn take_changed(&self) -> bool {
        take_settled(&mut self.last_change.lock(), Instant::now())
    }
}

fn take_settled(last_change: &mut Option<Instant>, now: Instant) -> bool {
    match *last_change {
        Some(at) if now.saturating_duration_since(at) >= SETTLE_TIME => {
            *last_change = None;
            true
        }
        _ => false,
    }
}

/// Content change or (re)creation of one of the watched SPIR-V files
fn touches_shader(event: &Event, watched: &[OsString]) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event
            .paths
            .iter()
            .filter_map(|path| path.file_name())
            .any(|name| watched.iter().any(|w| w.as_os_str() == name))
}
