//! Kernel configuration

use crate::error::KernelError;

/// Static limits of a kernel instance.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Maximum event stack depth. Depth 1 is the running frame and every
    /// external event needs one more for the reset pass.
    pub max_stack: u8,
    /// Nested organisms the arena can hold at once.
    pub max_organisms: usize,
    /// Emit a `trace!` line for every visited trail and executed label.
    pub trace_trails: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_stack: u8::MAX,
            max_organisms: 64,
            trace_trails: false,
        }
    }
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.max_stack < 2 {
            return Err(KernelError::InvalidConfig(format!(
                "max_stack must be at least 2, got {}",
                self.max_stack
            )));
        }
        if self.max_organisms >= u16::MAX as usize {
            return Err(KernelError::InvalidConfig(format!(
                "max_organisms must be below {}, got {}",
                u16::MAX,
                self.max_organisms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = KernelConfig::default();
        assert_eq!(config.max_stack, 255);
        assert_eq!(config.max_organisms, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_tiny_stack() {
        let config = KernelConfig {
            max_stack: 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(KernelError::InvalidConfig(_))
        ));
    }
}
