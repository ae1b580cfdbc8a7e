use crate::errors::{Error, UnsupportedConstruct};

pub struct Settings {
    /// Lowest Android API level the output has to run on
    ///
    /// Constructs that need a newer runtime are reported according to `unsupported_policy`.
    pub min_api_level: u32,

    /// What to do with constructs the minimum API level doesn't support
    pub unsupported_policy: UnsupportedPolicy,

    /// Attach local variable names (from the `LocalVariableTable`) to register specs
    pub keep_local_info: bool,

    /// Recognize `newarray` followed by constant element stores, and turn the sequence into a
    /// single `fill-array-data`
    pub compact_array_literals: bool,
}

/// Handling of constructs that are too new for the targeted API level
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UnsupportedPolicy {
    /// Abort translation of the method
    Fail,

    /// Log a warning and translate anyway
    Warn,
}

impl Settings {
    /// API level introducing `invoke-custom` (for `invokedynamic`)
    pub const INVOKE_CUSTOM_API: u32 = 26;

    /// API level introducing `invoke-polymorphic` (for `MethodHandle.invoke*`)
    pub const INVOKE_POLYMORPHIC_API: u32 = 26;

    /// API level introducing `const-method-handle` and `const-method-type`
    pub const CONST_METHOD_HANDLE_API: u32 = 28;

    /// API level introducing static and private interface methods
    pub const INTERFACE_METHOD_API: u32 = 24;

    pub fn new() -> Settings {
        Settings {
            min_api_level: 13,
            unsupported_policy: UnsupportedPolicy::Fail,
            keep_local_info: true,
            compact_array_literals: true,
        }
    }

    /// Check that a construct is available, applying the unsupported policy if it isn't
    pub fn require_api(&self, construct: &str, required_api: u32) -> Result<(), Error> {
        if self.min_api_level >= required_api {
            return Ok(());
        }
        let unsupported = UnsupportedConstruct {
            construct: construct.to_string(),
            required_api,
            min_api: self.min_api_level,
        };
        match self.unsupported_policy {
            UnsupportedPolicy::Fail => Err(Error::Unsupported(unsupported)),
            UnsupportedPolicy::Warn => {
                log::warn!(
                    "{} needs API level {} (targeting {})",
                    unsupported.construct,
                    unsupported.required_api,
                    unsupported.min_api
                );
                Ok(())
            }
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn api_gating_follows_policy() {
        let mut settings = Settings::new();
        assert!(settings.require_api("invoke-custom", 13).is_ok());

        let error = settings
            .require_api("invoke-custom", Settings::INVOKE_CUSTOM_API)
            .unwrap_err();
        assert!(
            matches!(
                &error,
                Error::Unsupported(UnsupportedConstruct {
                    required_api: 26,
                    min_api: 13,
                    ..
                })
            ),
            "unexpected error {:?}",
            error
        );

        settings.unsupported_policy = UnsupportedPolicy::Warn;
        assert!(settings
            .require_api("invoke-custom", Settings::INVOKE_CUSTOM_API)
            .is_ok());

        settings.unsupported_policy = UnsupportedPolicy::Fail;
        settings.min_api_level = 28;
        assert!(settings
            .require_api("const-method-handle", Settings::CONST_METHOD_HANDLE_API)
            .is_ok());
    }
}
