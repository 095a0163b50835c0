//! Shell completion generation.

use {
    crate::Cli,
    clap::CommandFactory,
    clap_complete::{Shell, generate},
    std::io,
};

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    write_completions(shell, &mut io::stdout());
}

fn write_completions(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(shell: Shell) -> String {
        let mut buf = Vec::new();
        write_completions(shell, &mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_bash_completions_mention_binary_and_subcommands() {
        let output = script(Shell::Bash);
        assert!(output.contains("espflow"));
        assert!(output.contains("list-ports"));
        assert!(output.contains("--bundle"));
    }

    #[test]
    fn test_other_shells_generate_output() {
        for shell in [Shell::Zsh, Shell::Fish, Shell::PowerShell, Shell::Elvish] {
            assert!(!script(shell).is_empty(), "{shell:?}");
        }
    }
}
