use parking_lot::Mutex;

/// Navigation collaborator. `replace` swaps the current history entry, so
/// the intercepted page cannot be reached with "back".
pub trait Navigator: Send + Sync {
    fn replace(&self, path: &str);
}

/// Keeps every redirect it is asked to perform. The HTTP layer uses it to
/// hand the target back to the browser.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    history: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self { Self::default() }

    pub fn last(&self) -> Option<String> { self.history.lock().last().cloned() }

    pub fn history(&self) -> Vec<String> { self.history.lock().clone() }

    pub fn count(&self) -> usize { self.history.lock().len() }
}

impl Navigator for RecordingNavigator {
    fn replace(&self, path: &str) {
        self.history.lock().push(path.to_string());
    }
}
