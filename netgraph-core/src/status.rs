/// Run context handed to every layer call.
///
/// Replaces process-wide state: a layer learns whether the graph is testing
/// or gradient testing only through the `NetStatus` it is given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetStatus {
    is_testing: bool,
    is_gradient_testing: bool,
}

impl NetStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the graph runs on held-out data.
    pub fn is_testing(&self) -> bool {
        self.is_testing
    }

    /// True while a numeric gradient check is running.
    pub fn is_gradient_testing(&self) -> bool {
        self.is_gradient_testing
    }

    pub fn set_is_testing(&mut self, is_testing: bool) {
        self.is_testing = is_testing;
    }

    pub fn set_is_gradient_testing(&mut self, is_gradient_testing: bool) {
        self.is_gradient_testing = is_gradient_testing;
    }
}
