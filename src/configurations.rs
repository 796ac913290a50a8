//! Static catalog of personal configuration files users may keep and deploy.
//! Only names listed here can ever appear in a user's `configurations` mapping.

use std::collections::BTreeMap;

/// Largest file content accepted. The Docker engine writer passes the content base64
/// encoded in a single exec environment string, which Linux caps at 128 KiB.
pub const MAX_FILE_BYTES: usize = 64 * 1024;

pub struct ConfigFile {
    pub name: &'static str,
    pub default_template: &'static str,
}

const BASHRC: &str = "# ~/.bashrc: executed by bash(1) for non-login shells.\n\
[ -z \"$PS1\" ] && return\n\
HISTCONTROL=ignoreboth\n\
shopt -s histappend\n\
alias ll='ls -alF'\n";

const GITCONFIG: &str = "[core]\n\
\teditor = vim\n\
[color]\n\
\tui = auto\n\
[push]\n\
\tdefault = simple\n";

const GITIGNORE: &str = "*.swp\n*~\n.DS_Store\n";

const VIMRC: &str = "set nocompatible\n\
syntax on\n\
set expandtab\n\
set shiftwidth=2\n\
set tabstop=2\n";

const EMACS: &str = ";; ~/.emacs\n\
(setq-default indent-tabs-mode nil)\n\
(setq inhibit-startup-screen t)\n";

const HGRC: &str = "[ui]\n\
username =\n\
[extensions]\n\
color =\n";

const NANORC: &str = "set tabsize 2\nset tabstospaces\n";

pub static CATALOG: &[ConfigFile] = &[
    ConfigFile { name: ".bashrc", default_template: BASHRC },
    ConfigFile { name: ".emacs", default_template: EMACS },
    ConfigFile { name: ".gitconfig", default_template: GITCONFIG },
    ConfigFile { name: ".gitignore", default_template: GITIGNORE },
    ConfigFile { name: ".hgrc", default_template: HGRC },
    ConfigFile { name: ".nanorc", default_template: NANORC },
    ConfigFile { name: ".vimrc", default_template: VIMRC },
];

pub fn is_allowed(name: &str) -> bool {
    CATALOG.iter().any(|f| f.name == name)
}

pub fn default_template(name: &str) -> Option<&'static str> {
    CATALOG.iter().find(|f| f.name == name).map(|f| f.default_template)
}

/// Whitelist in the shape the patch engine expects.
pub fn whitelist() -> Vec<&'static str> {
    CATALOG.iter().map(|f| f.name).collect()
}

/// Fresh configuration set for a new account.
pub fn defaults() -> BTreeMap<String, String> {
    CATALOG
        .iter()
        .map(|f| (f.name.to_string(), f.default_template.to_string()))
        .collect()
}
