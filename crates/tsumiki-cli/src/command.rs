//! Commands read from stdin, one per line.
//!
//! Lines and columns are 1-based, like an editor's status line.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};

/// A `LINE` or `LINE:COLUMN` location, stored 0-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct At {
    pub line: u32,
    pub column: u32,
}

impl At {
    pub fn coords(self) -> (u32, u32) {
        (self.line, self.column)
    }
}

impl FromStr for At {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let one_based = |part: &str| -> Result<u32, String> {
            match part.parse::<u32>() {
                Ok(0) | Err(_) => Err(format!("expected a positive number, got '{part}'")),
                Ok(n) => Ok(n - 1),
            }
        };
        match s.split_once(':') {
            Some((line, column)) => Ok(Self {
                line: one_based(line)?,
                column: one_based(column)?,
            }),
            None => Ok(Self {
                line: one_based(s)?,
                column: 0,
            }),
        }
    }
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
pub struct Line {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start a kernel for the document (a name, or a connection file path)
    Init { kernel: String },

    /// List the configured and installed kernels
    Kernels,

    /// Evaluate a selection; `line` takes whole lines, `char` runs from FIRST
    /// through LAST
    Eval {
        first: At,
        last: Option<At>,
        #[arg(long, default_value = "line")]
        kind: String,
    },

    /// Evaluate code that is not part of the document
    Expr {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        code: Vec<String>,
    },

    /// Re-run the cell under the cursor
    Rerun,

    /// Mark lines FIRST..=LAST as a cell without running it
    Define { first: At, last: At },

    /// Move the cursor
    Goto { at: At },

    /// Insert text at a location; `\n` starts a new line
    Insert {
        at: At,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Delete the cell under the cursor
    Delete,

    /// Open the output window of the selected cell
    Show,

    /// Focus the output window of the selected cell
    Enter,

    /// Interrupt the running execution
    Interrupt,

    /// Restart the kernel
    Restart {
        #[arg(long)]
        delete_outputs: bool,
    },

    /// Save outputs to PATH or the default save file
    Save { path: Option<PathBuf> },

    /// Start a session from PATH or the default save file
    Load { path: Option<PathBuf> },

    /// Stop the kernel and forget every cell
    Deinit,

    /// Exit
    #[command(alias = "q")]
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse_line(line: &str) -> Result<Option<Self>, clap::Error> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Ok(None);
        }
        Line::try_parse_from(words).map(|l| Some(l.command))
    }
}

/// Undo the `\n` escape accepted by `insert`.
pub fn unescape(words: &[String]) -> String {
    words.join(" ").replace("\\n", "\n")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_is_one_based() {
        assert_eq!("3".parse::<At>().unwrap(), At { line: 2, column: 0 });
        assert_eq!("3:7".parse::<At>().unwrap(), At { line: 2, column: 6 });
        assert!("0".parse::<At>().is_err());
        assert!("x:1".parse::<At>().is_err());
    }

    #[test]
    fn test_parse_eval_variants() {
        let cmd = Command::parse_line("eval 1 3").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Eval {
                first: At { line: 0, column: 0 },
                last: Some(At { line: 2, column: 0 }),
                kind: "line".into(),
            }
        );
        let cmd = Command::parse_line("eval --kind char 2:1 2:4").unwrap().unwrap();
        assert!(matches!(cmd, Command::Eval { kind, .. } if kind == "char"));
    }

    #[test]
    fn test_expr_keeps_every_word() {
        let cmd = Command::parse_line("expr print( -1 )").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Expr {
                code: vec!["print(".into(), "-1".into(), ")".into()]
            }
        );
    }

    #[test]
    fn test_blank_and_unknown_lines() {
        assert!(Command::parse_line("   ").unwrap().is_none());
        assert!(Command::parse_line("frobnicate").is_err());
        assert_eq!(Command::parse_line("q").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_restart_flag() {
        assert_eq!(
            Command::parse_line("restart --delete-outputs").unwrap(),
            Some(Command::Restart { delete_outputs: true })
        );
    }

    #[test]
    fn test_unescape_newlines() {
        assert_eq!(unescape(&["a\\nb".into(), "c".into()]), "a\nb c");
    }
}
