//! Argument checks for allow-listed programs that can start other programs.
//!
//! Each check sees the words of one command segment after its binary and
//! returns the first word that would let the program run something outside
//! the allow-list. Long options are matched by prefix as well, because getopt
//! accepts any unambiguous abbreviation (`--to-c` is `--to-command`).

/// `find` actions that run or delete instead of listing.
const FIND_ACTIONS: &[&str] = &["-exec", "-execdir", "-ok", "-okdir", "-delete"];

const TAR_COMMAND_OPTIONS: &[&str] = &[
    "--checkpoint-action",
    "--info-script",
    "--new-volume-script",
    "--rmt-command",
    "--rsh-command",
    "--to-command",
    "--use-compress-program",
];

/// `-I` (compress program) and `-F` (volume script).
const TAR_COMMAND_FLAGS: &[char] = &['I', 'F'];

const GIT_SUBCOMMANDS: &[&str] = &[
    "bisect",
    "config",
    "daemon",
    "difftool",
    "filter-branch",
    "instaweb",
    "mergetool",
    "submodule",
];

const GIT_COMMAND_OPTIONS: &[&str] = &[
    "--config",
    "--config-env",
    "--exec",
    "--exec-path",
    "--extcmd",
    "--open-files-in-pager",
    "--receive-pack",
    "--upload-pack",
];

/// Global options whose value is the following word.
const GIT_GLOBAL_VALUES: &[&str] = &["-C", "--git-dir", "--work-tree", "--namespace", "--super-prefix"];

/// Subcommand flags that take a program or a config override.
const GIT_COMMAND_FLAGS: &[(&str, &str)] = &[
    ("clone", "-c"),
    ("clone", "-u"),
    ("grep", "-O"),
    ("rebase", "-x"),
];

const WGET_COMMAND_OPTIONS: &[&str] = &["--config", "--execute", "--use-askpass"];
const RG_COMMAND_OPTIONS: &[&str] = &["--pre", "--pre-glob"];
const SORT_COMMAND_OPTIONS: &[&str] = &["--compress-program"];
const ZIP_COMMAND_OPTIONS: &[&str] = &["--unzip-command"];

/// The first word of `args` that lets `binary` escape the allow-list.
pub(crate) fn escape_argument(binary: &str, args: &[String]) -> Option<String> {
    let found = match binary {
        "find" => args.iter().find(|arg| FIND_ACTIONS.contains(&arg.as_str())),
        "sed" => return sed_escape(args),
        "tar" => tar_escape(args),
        "git" => git_escape(args),
        "wget" => args.iter().find(|arg| {
            names_option(arg, WGET_COMMAND_OPTIONS) || short_cluster_has(arg, &['e'])
        }),
        "rg" => args.iter().find(|arg| names_option(arg, RG_COMMAND_OPTIONS)),
        "sort" => args.iter().find(|arg| names_option(arg, SORT_COMMAND_OPTIONS)),
        "zip" => args
            .iter()
            .find(|arg| arg.starts_with("-TT") || names_option(arg, ZIP_COMMAND_OPTIONS)),
        "hyprctl" => args
            .iter()
            .find(|arg| arg.to_ascii_lowercase().contains("exec")),
        // `ip netns exec` and `ip vrf exec`, plus batch files that may hold them.
        "ip" => args.iter().find(|arg| {
            abbreviates(arg, "exec") || (arg.len() >= 2 && "-batch".starts_with(arg.as_str()))
        }),
        _ => None,
    };
    found.cloned()
}

/// `--name` or `--name=value` naming one of `options`, possibly abbreviated.
fn names_option(arg: &str, options: &[&str]) -> bool {
    if !arg.starts_with("--") {
        return false;
    }
    let name = arg.split_once('=').map_or(arg, |(name, _)| name);
    name.len() > 3 && options.iter().any(|option| option.starts_with(name))
}

/// A bundle of short flags (`-xvf`) containing any of `flags`.
fn short_cluster_has(arg: &str, flags: &[char]) -> bool {
    arg.len() > 1
        && arg.starts_with('-')
        && !arg.starts_with("--")
        && arg.chars().skip(1).any(|c| flags.contains(&c))
}

fn abbreviates(word: &str, full: &str) -> bool {
    !word.is_empty() && full.starts_with(word)
}

fn tar_escape(args: &[String]) -> Option<&String> {
    args.iter()
        .enumerate()
        .find(|(index, arg)| {
            names_option(arg, TAR_COMMAND_OPTIONS)
                || short_cluster_has(arg, TAR_COMMAND_FLAGS)
                // Old-style bundle without a dash: `tar cIf ...`.
                || (*index == 0
                    && !arg.starts_with('-')
                    && arg.chars().any(|c| TAR_COMMAND_FLAGS.contains(&c)))
        })
        .map(|(_, arg)| arg)
}

fn git_escape(args: &[String]) -> Option<&String> {
    let mut words = args.iter();
    let mut subcommand = None;

    while let Some(arg) = words.next() {
        if arg.starts_with("-c") || names_option(arg, GIT_COMMAND_OPTIONS) {
            return Some(arg);
        }
        if GIT_GLOBAL_VALUES.contains(&arg.as_str()) {
            words.next();
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        subcommand = Some(arg);
        break;
    }

    let subcommand = subcommand?;
    if GIT_SUBCOMMANDS.contains(&subcommand.as_str()) {
        return Some(subcommand);
    }
    words.find(|arg| {
        names_option(arg, GIT_COMMAND_OPTIONS)
            || GIT_COMMAND_FLAGS
                .iter()
                .any(|(command, flag)| subcommand == command && arg.starts_with(flag))
    })
}

/// Refuses `-f`/`--file` scripts outright and any inline script that runs a
/// command through GNU sed's `e` command or the `e` flag of `s`.
fn sed_escape(args: &[String]) -> Option<String> {
    let mut scripts: Vec<String> = Vec::new();
    let mut operands: Vec<&String> = Vec::new();
    let mut words = args.iter();

    while let Some(arg) = words.next() {
        if arg == "--" {
            operands.extend(words.by_ref());
            break;
        }

        if let Some(long) = arg.strip_prefix("--") {
            let (name, value) = match long.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (long, None),
            };
            if abbreviates(name, "file") {
                return Some(arg.clone());
            }
            if abbreviates(name, "expression") {
                match value {
                    Some(value) => scripts.push(value.to_string()),
                    None => scripts.extend(words.next().cloned()),
                }
            } else if value.is_none() && abbreviates(name, "line-length") {
                words.next();
            }
            continue;
        }

        if let Some(flags) = arg.strip_prefix('-').filter(|flags| !flags.is_empty()) {
            for (index, flag) in flags.char_indices() {
                let rest = &flags[index + flag.len_utf8()..];
                match flag {
                    'f' => return Some(arg.clone()),
                    'e' | 'l' => {
                        let value = if rest.is_empty() {
                            words.next().cloned()
                        } else {
                            Some(rest.to_string())
                        };
                        if flag == 'e' {
                            scripts.extend(value);
                        }
                        break;
                    }
                    // Optional backup suffix follows.
                    'i' => break,
                    _ => {}
                }
            }
            continue;
        }

        operands.push(arg);
    }

    if scripts.is_empty() {
        scripts.extend(operands.first().map(|script| script.to_string()));
    }
    scripts.into_iter().find(|script| sed_script_executes(script))
}

/// Walks a sed script command by command looking for `e`.
fn sed_script_executes(script: &str) -> bool {
    let chars: Vec<char> = script.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i].is_whitespace() || matches!(chars[i], ';' | '{' | '}' | '!') {
            i += 1;
            continue;
        }
        i = skip_address(&chars, i);
        let Some(&command) = chars.get(i) else {
            return false;
        };
        i += 1;

        match command {
            'e' => return true,
            's' => {
                let Some(&delim) = chars.get(i) else {
                    return false;
                };
                i = skip_delimited(&chars, i + 1, delim);
                i = skip_delimited(&chars, i, delim);
                while let Some(&flag) = chars.get(i) {
                    match flag {
                        'e' => return true,
                        // The rest of the script is a file name.
                        'w' => return false,
                        c if c.is_ascii_alphanumeric() => i += 1,
                        _ => break,
                    }
                }
            }
            'y' => {
                let Some(&delim) = chars.get(i) else {
                    return false;
                };
                i = skip_delimited(&chars, i + 1, delim);
                i = skip_delimited(&chars, i, delim);
            }
            // Text or a file name runs to the end of the script.
            'a' | 'i' | 'c' | 'r' | 'R' | 'w' | 'W' => return false,
            'b' | 't' | 'T' | ':' | 'v' => {
                while i < chars.len() && !matches!(chars[i], ';' | '}') {
                    i += 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// Skip line numbers, `$`, ranges, steps and `/regex/` addresses.
fn skip_address(chars: &[char], mut i: usize) -> usize {
    loop {
        match chars.get(i) {
            Some(c) if c.is_ascii_digit() || matches!(c, '$' | ',' | '~' | '+' | '!' | ' ') => {
                i += 1
            }
            Some('/') => {
                i = skip_regex_flags(chars, skip_delimited(chars, i + 1, '/'));
            }
            Some('\\') => match chars.get(i + 1) {
                Some(&delim) => i = skip_regex_flags(chars, skip_delimited(chars, i + 2, delim)),
                None => return i + 1,
            },
            _ => return i,
        }
    }
}

fn skip_regex_flags(chars: &[char], mut i: usize) -> usize {
    while matches!(chars.get(i), Some('I' | 'M')) {
        i += 1;
    }
    i
}

/// Index just past the next unescaped `delim` at or after `start`.
fn skip_delimited(chars: &[char], start: usize, delim: char) -> usize {
    let mut i = start;
    while i < chars.len() {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == delim {
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}
