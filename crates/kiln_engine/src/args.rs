//! Compiler argument assembly.

use std::path::Path;

use crate::library::LibraryResolver;
use crate::request::{BackendOptions, Filters, LibrarySpec};
use crate::toolchain::Toolchain;

/// Assembles the compiler's argument vector.
///
/// The composition order is fixed because some compilers are sensitive to it:
///
/// 1. filter-derived flags
/// 2. the toolchain's default options
/// 3. the optimization record flag, if supported and requested
/// 4. library include flags
/// 5. library options
/// 6. library search path flags (binary only)
/// 7. library link flags (binary only)
/// 8. user options, after the toolchain's allow-list
/// 9. the primary input
/// 10. the secondary input, always, since its file is always written
/// 11. static link flags (binary only)
///
/// Empty entries are dropped.
pub struct ArgumentBuilder<'a> {
    toolchain: &'a Toolchain,
    libraries: &'a dyn LibraryResolver,
}

impl<'a> ArgumentBuilder<'a> {
    /// Creates a builder for `toolchain`, resolving libraries with `libraries`.
    pub fn new(toolchain: &'a Toolchain, libraries: &'a dyn LibraryResolver) -> Self {
        Self {
            toolchain,
            libraries,
        }
    }

    /// Builds the argument vector.
    pub fn build(
        &self,
        user_options: &[String],
        filters: &Filters,
        backend_options: &BackendOptions,
        input: &Path,
        output: &Path,
        libs: &[LibrarySpec],
    ) -> Vec<String> {
        let tc = self.toolchain;
        let filters = tc.downgrade(filters);
        let binary = filters.binary;
        let input = input.display().to_string();

        let mut args = (tc.options_for_filter)(&filters, &output.display().to_string());
        args.extend(split_arguments(&tc.options));
        if tc.supports_opt_output && backend_options.produce_opt_info {
            args.push(tc.opt_arg.clone());
        }
        args.extend(self.libraries.include_args(libs));
        args.extend(self.libraries.library_options(libs));
        if binary {
            args.extend(self.libraries.lib_path_args(libs));
            args.extend(self.libraries.link_args(libs));
        }
        args.extend((tc.filter_user_options)(user_options));
        let sub = Toolchain::sub_filename(Path::new(&input));
        args.push((tc.filename_transform)(&input));
        args.push((tc.filename_transform)(&sub.display().to_string()));
        if binary {
            args.extend(self.libraries.static_link_args(libs));
        }

        args.retain(|a| !a.is_empty());
        args
    }
}

/// Splits an option string the way a POSIX shell would split words.
///
/// Single quotes are literal, double quotes allow `\"` and `\\`, and a
/// backslash outside quotes escapes the next character.
pub fn split_arguments(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '"' => {
                in_word = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => match chars.next() {
                            Some(e @ ('"' | '\\')) => current.push(e),
                            Some(e) => {
                                current.push('\\');
                                current.push(e);
                            }
                            None => current.push('\\'),
                        },
                        _ => current.push(q),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(e) = chars.next() {
                    current.push(e);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            _ => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::ConfiguredLibraries;
    use crate::toolchain::LibraryFlags;

    fn libraries() -> ConfiguredLibraries {
        let config = kiln_config::load_config_from_str(
            r#"
[libraries.fmt.versions.10]
include = ["/opt/fmt/include"]
lib_paths = ["/opt/fmt/lib"]
links = ["fmt"]
static_links = ["fmtstatic"]
options = ["-DFMT"]
"#,
        )
        .unwrap();
        ConfiguredLibraries::new(config.libraries, LibraryFlags::default())
    }

    fn toolchain() -> Toolchain {
        Toolchain::new("cc", "/usr/bin/cc")
            .with_binary(true)
            .with_options("-O2 -g")
            .with_opt_output("-fsave-optimization-record")
            .with_filter_flags(|filters, output| {
                let mut flags = vec!["-o".to_string(), output.to_string()];
                if !filters.binary {
                    flags.push("-S".into());
                }
                flags
            })
    }

    fn libs() -> Vec<LibrarySpec> {
        vec![LibrarySpec::new("fmt", "10")]
    }

    #[test]
    fn binary_ordering() {
        let tc = toolchain();
        let libraries = libraries();
        let builder = ArgumentBuilder::new(&tc, &libraries);
        let filters = Filters {
            binary: true,
            ..Filters::default()
        };
        let backend = BackendOptions {
            produce_opt_info: true,
            ..BackendOptions::default()
        };
        let args = builder.build(
            &["-Wall".into()],
            &filters,
            &backend,
            Path::new("/w/example.c"),
            Path::new("/w/output.s"),
            &libs(),
        );
        assert_eq!(
            args,
            vec![
                "-o",
                "/w/output.s",
                "-O2",
                "-g",
                "-fsave-optimization-record",
                "-I/opt/fmt/include",
                "-DFMT",
                "-L/opt/fmt/lib",
                "-Wl,-rpath,/opt/fmt/lib",
                "-lfmt",
                "-Wall",
                "/w/example.c",
                "/w/example.c_tgt",
                "-lfmtstatic",
            ]
        );
    }

    #[test]
    fn assembly_mode_skips_link_flags() {
        let tc = toolchain();
        let libraries = libraries();
        let builder = ArgumentBuilder::new(&tc, &libraries);
        let args = builder.build(
            &[],
            &Filters::default(),
            &BackendOptions::default(),
            Path::new("/w/example.c"),
            Path::new("/w/output.s"),
            &libs(),
        );
        assert_eq!(
            args,
            vec![
                "-o",
                "/w/output.s",
                "-S",
                "-O2",
                "-g",
                "-I/opt/fmt/include",
                "-DFMT",
                "/w/example.c",
                "/w/example.c_tgt",
            ]
        );
    }

    #[test]
    fn secondary_input_follows_primary() {
        let tc = Toolchain::new("tv", "/opt/tv");
        let libraries = libraries();
        let builder = ArgumentBuilder::new(&tc, &libraries);
        let args = builder.build(
            &[],
            &Filters::default(),
            &BackendOptions::default(),
            Path::new("/w/example.mlir"),
            Path::new("/w/output.s"),
            &[],
        );
        assert_eq!(args, vec!["/w/example.mlir", "/w/example.mlir_tgt"]);
    }

    #[test]
    fn secondary_input_is_independent_of_sub_source() {
        let tc = Toolchain::new("tv", "/opt/tv")
            .with_filename_transform(|name| name.rsplit('/').next().unwrap_or(name).to_string());
        let libraries = libraries();
        let builder = ArgumentBuilder::new(&tc, &libraries);
        let build = |sub_source: Option<&str>| {
            let backend = BackendOptions {
                sub_source: sub_source.map(String::from),
                ..BackendOptions::default()
            };
            builder.build(
                &["--smt-to=100".into()],
                &Filters::default(),
                &backend,
                Path::new("/w/example.mlir"),
                Path::new("/w/output.s"),
                &[],
            )
        };
        assert_eq!(build(None), vec!["--smt-to=100", "example.mlir", "example.mlir_tgt"]);
        assert_eq!(build(Some("tgt")), build(None));
    }

    #[test]
    fn unsupported_binary_builds_like_assembly() {
        let tc = Toolchain::new("tv", "/opt/tv").with_filter_flags(|filters, _| {
            if filters.binary {
                vec!["--link".into()]
            } else {
                vec!["--asm".into()]
            }
        });
        let libraries = libraries();
        let builder = ArgumentBuilder::new(&tc, &libraries);
        let build = |binary| {
            builder.build(
                &[],
                &Filters {
                    binary,
                    ..Filters::default()
                },
                &BackendOptions::default(),
                Path::new("/w/in"),
                Path::new("/w/out"),
                &libs(),
            )
        };
        assert_eq!(build(true), build(false));
    }

    #[test]
    fn opt_flag_needs_support_and_request() {
        let tc = Toolchain::new("tv", "/opt/tv");
        let libraries = libraries();
        let builder = ArgumentBuilder::new(&tc, &libraries);
        let backend = BackendOptions {
            produce_opt_info: true,
            ..BackendOptions::default()
        };
        let args = builder.build(
            &[],
            &Filters::default(),
            &backend,
            Path::new("/w/in"),
            Path::new("/w/out"),
            &[],
        );
        assert_eq!(args, vec!["/w/in", "/w/in_tgt"]);
    }

    #[test]
    fn user_options_pass_through_allow_list() {
        let tc = Toolchain::new("tv", "/opt/tv").with_user_options_filter(|opts| {
            opts.iter().filter(|o| o.starts_with("-O")).cloned().collect()
        });
        let libraries = libraries();
        let builder = ArgumentBuilder::new(&tc, &libraries);
        let args = builder.build(
            &["-O3".into(), "-march=native".into(), String::new()],
            &Filters::default(),
            &BackendOptions::default(),
            Path::new("/w/in"),
            Path::new("/w/out"),
            &[],
        );
        assert_eq!(args, vec!["-O3", "/w/in", "/w/in_tgt"]);
    }

    #[test]
    fn split_plain_words() {
        assert_eq!(split_arguments("  -O2   -g "), vec!["-O2", "-g"]);
        assert!(split_arguments("").is_empty());
    }

    #[test]
    fn split_quotes_and_escapes() {
        assert_eq!(
            split_arguments(r#"-DNAME="a b" '-Dx=$y' c\ d """#),
            vec!["-DNAME=a b", "-Dx=$y", "c d", ""]
        );
        assert_eq!(split_arguments(r#""say \"hi\"""#), vec![r#"say "hi""#]);
    }
}
