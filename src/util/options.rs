use std::default::Default;

fn always_valid<T>(_: &T) -> bool {
    true
}

/// Options for the barrier generator.
///
/// Each option has a type, a validator and a default value. `Options::default()`
/// starts from the defaults and then applies every `BARRIER_*` environment variable
/// that names an option (e.g. `BARRIER_COUNT_SITES=true`). Options can also be set
/// programmatically with [`Options::set_from_str`] before the options are handed to
/// a [`crate::BarrierSet`].
macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }
        impl Options {
            /// Set an option from its snake_case name and a string value. Returns `false` and keeps
            /// the current value if the value cannot be parsed or is rejected by the validator.
            pub fn set_from_str(&mut self, s: &str, val: &str)->bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            eprintln!("Warn: unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        eprintln!("Warn: unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => panic!("Invalid Options key: {}", s)
                }
            }

            /// The options with their defaults only, ignoring the environment.
            pub fn builtin_defaults() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Self::builtin_defaults();

                // If we have env vars that start with BARRIER_ and match any option (such as BARRIER_COUNT_SITES),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                const PREFIX: &str = "BARRIER_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    /// Check at code-generation time that the registers bound to a barrier's operands do not alias.
    verify_operands:       bool                 [always_valid] = true,
    /// Count emitted barrier sites, trampolines and deferred stubs (see `util::statistics`).
    count_sites:           bool                 [always_valid] = false,
    /// The default reference encoding used by `BarrierFlags::from_options`.
    compressed_references: bool                 [always_valid] = false,
    /// The number of deferred stubs a single compiled method may hold before we warn about it.
    stub_warning_threshold: usize               [|v: &usize| *v > 0] = 4096
}

impl Options {
    /// Set an option from its camelCase name, as embedders usually spell command-line options
    /// (e.g. `countSites`).
    pub fn set_from_camelcase_str(&mut self, s: &str, val: &str) -> bool {
        trace!("Trying to process option pair: ({}, {})", s, val);

        let mut sr = String::with_capacity(s.len());
        for c in s.chars() {
            if c.is_uppercase() {
                sr.push('_');
                for c in c.to_lowercase() {
                    sr.push(c);
                }
            } else {
                sr.push(c)
            }
        }

        let result = self.set_from_str(sr.as_str(), val);

        trace!("Trying to process option pair: ({})", sr);

        if result {
            trace!("Validation passed");
        } else {
            trace!("Validation failed")
        }
        result
    }
}
