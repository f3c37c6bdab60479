//! Macro for declaring lifecycle enums.

/// Declare an enum together with its `State` implementation and its table of
/// legal transitions.
///
/// # Example
///
/// ```
/// use foldwise::state_enum;
/// use foldwise::core::State;
///
/// state_enum! {
///     pub enum Door {
///         Closed,
///         Open,
///         Jammed,
///     }
///     final: [Jammed]
///     error: [Jammed]
///     transitions: {
///         Closed => [Open, Jammed],
///         Open => [Closed],
///     }
/// }
///
/// assert!(Door::Closed.allows(&Door::Open));
/// assert!(!Door::Jammed.allows(&Door::Closed));
/// ```
#[macro_export]
macro_rules! state_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident
            ),* $(,)?
        }

        $(final: [$($final:ident),* $(,)?])?
        $(error: [$($error:ident),* $(,)?])?
        transitions: {
            $($from:ident => [$($to:ident),+ $(,)?]),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant
            ),*
        }

        impl $crate::core::State for $name {
            fn name(&self) -> &str {
                match self {
                    $(Self::$variant => stringify!($variant)),*
                }
            }

            fn is_final(&self) -> bool {
                match self {
                    $($(Self::$final => true,)*)?
                    #[allow(unreachable_patterns)]
                    _ => false,
                }
            }

            fn is_error(&self) -> bool {
                match self {
                    $($(Self::$error => true,)*)?
                    #[allow(unreachable_patterns)]
                    _ => false,
                }
            }

            fn allows(&self, next: &Self) -> bool {
                match self {
                    $(Self::$from => matches!(next, $(Self::$to)|+),)*
                    #[allow(unreachable_patterns)]
                    _ => false,
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::core::State;

    state_enum! {
        enum Light {
            Red,
            Green,
            Broken,
        }
        final: [Broken]
        error: [Broken]
        transitions: {
            Red => [Green, Broken],
            Green => [Red, Broken],
        }
    }

    #[test]
    fn state_enum_macro_generates_trait() {
        assert_eq!(Light::Red.name(), "Red");
        assert!(!Light::Red.is_final());
        assert!(Light::Broken.is_final());
        assert!(Light::Broken.is_error());
    }

    #[test]
    fn transitions_table_is_enforced() {
        assert!(Light::Red.allows(&Light::Green));
        assert!(Light::Green.allows(&Light::Broken));
        assert!(!Light::Red.allows(&Light::Red));
        assert!(!Light::Broken.allows(&Light::Red));
    }

    #[test]
    fn state_enum_works_without_final_error() {
        state_enum! {
            pub enum Toggle {
                On,
                Off,
            }
            transitions: {
                On => [Off],
                Off => [On],
            }
        }

        assert!(!Toggle::On.is_final());
        assert!(!Toggle::Off.is_error());
        assert!(Toggle::On.allows(&Toggle::Off));
    }
}
