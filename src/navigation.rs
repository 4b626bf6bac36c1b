//! Navigation host seam.

use std::sync::Mutex;

use tracing::info;

/// Options for an imperative navigation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavigateOptions {
    /// Replace the current history entry instead of pushing a new one.
    pub replace: bool,
}

impl NavigateOptions {
    pub fn replace() -> Self {
        Self { replace: true }
    }
}

/// Whatever hosts the screens: a browser history, a native router, a test
/// double.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str, options: NavigateOptions);

    fn current_path(&self) -> String;
}

/// A navigation performed through [`Navigator::navigate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRecord {
    pub path: String,
    pub replace: bool,
}

#[derive(Debug)]
struct History {
    entries: Vec<String>,
    log: Vec<NavigationRecord>,
}

/// In-memory history stack that records every navigation it is asked for.
#[derive(Debug)]
pub struct HistoryNavigator {
    inner: Mutex<History>,
}

impl HistoryNavigator {
    pub fn new(initial_path: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(History {
                entries: vec![initial_path.into()],
                log: Vec::new(),
            }),
        }
    }

    /// The user went somewhere on their own (typed a URL, clicked a link).
    /// Not recorded as a flow navigation.
    pub fn visit(&self, path: impl Into<String>) {
        self.lock().entries.push(path.into());
    }

    /// Every navigation the flow performed, oldest first.
    pub fn navigations(&self) -> Vec<NavigationRecord> {
        self.lock().log.clone()
    }

    /// How many times the flow navigated to `path`.
    pub fn count_to(&self, path: &str) -> usize {
        self.lock().log.iter().filter(|n| n.path == path).count()
    }

    pub fn history_len(&self) -> usize {
        self.lock().entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, History> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Navigator for HistoryNavigator {
    fn navigate(&self, path: &str, options: NavigateOptions) {
        let mut history = self.lock();
        if options.replace {
            history.entries.pop();
        }
        history.entries.push(path.to_string());
        history.log.push(NavigationRecord {
            path: path.to_string(),
            replace: options.replace,
        });
        info!(path = %path, replace = options.replace, "Navigated");
    }

    fn current_path(&self) -> String {
        self.lock().entries.last().cloned().unwrap_or_else(|| "/".to_string())
    }
}
