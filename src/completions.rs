//! Shell completion scripts. Bash additionally completes task names by
//! asking `rhake complete-tasks` for candidates.

use clap::CommandFactory;
use clap_complete::{generate, Shell};
use std::io;

use crate::cli::Cli;

const BASH_DYNAMIC_TASKS: &str = r#"

__rhake_dynamic_tasks() {
    local prefix="${1:-}"
    local cmd=(rhake)
    local idx=1
    while [[ $idx -lt ${#COMP_WORDS[@]} ]]; do
        case "${COMP_WORDS[$idx]}" in
            -f|--file)
                ((idx++))
                cmd+=(--file "${COMP_WORDS[$idx]}")
                ;;
        esac
        ((idx++))
    done
    cmd+=(complete-tasks "$prefix")
    "${cmd[@]}" 2>/dev/null
}

_rhake() {
    local cur="${COMP_WORDS[COMP_CWORD]}"
    local sub=""
    local idx=1
    while [[ $idx -lt $COMP_CWORD ]]; do
        case "${COMP_WORDS[$idx]}" in
            -f|--file|--state-file|-j|--jobs|--timeout|--var)
                ((idx++))
                ;;
            -*)
                ;;
            *)
                sub="${COMP_WORDS[$idx]}"
                break
                ;;
        esac
        ((idx++))
    done

    case "$sub" in
        run|clean|status|forget|"")
            if [[ "$cur" != -* ]]; then
                local candidates="$(__rhake_dynamic_tasks "$cur")"
                if [[ -n "$candidates" ]]; then
                    COMPREPLY=( $(compgen -W "$candidates" -- "$cur") )
                    return 0
                fi
            fi
            ;;
    esac
    __rhake_base "$@"
}

complete -F _rhake -o bashdefault -o default rhake
"#;

fn patch_bash(script: String) -> String {
    if !script.contains("_rhake()") {
        return script;
    }
    let mut script = script.replacen("_rhake()", "__rhake_base()", 1);
    script.push_str(BASH_DYNAMIC_TASKS);
    script
}

pub fn print(shell: Shell) {
    let mut cmd = Cli::command().allow_external_subcommands(false);
    let bin_name = cmd.get_name().to_string();
    match shell {
        Shell::Bash => {
            let mut buffer = Vec::new();
            generate(shell, &mut cmd, &bin_name, &mut buffer);
            let script = String::from_utf8_lossy(&buffer).into_owned();
            print!("{}", patch_bash(script));
        }
        other => generate(other, &mut cmd, &bin_name, &mut io::stdout()),
    }
}
