// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Single-quotes `p` for POSIX shells.
pub fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// Escapes and space-joins a whole argument vector.
pub fn sh_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| sh_escape(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_embedded_quotes() {
        assert_eq!(sh_escape("it's"), r"'it'\''s'");
    }

    #[test]
    fn joins_arguments() {
        assert_eq!(sh_join(&["figlet", "hi there"]), "'figlet' 'hi there'");
    }
}
