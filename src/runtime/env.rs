//! Terminal information.

use std::io::IsTerminal;

use super::RealRuntime;

impl RealRuntime {
    pub(crate) fn is_interactive_impl(&self) -> bool {
        std::io::stdin().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};

    #[test]
    fn test_is_interactive_does_not_panic() {
        // Depends on how the tests are run; only the call itself is checked.
        let _ = RealRuntime.is_interactive();
    }
}
