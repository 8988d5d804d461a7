//! In-band slash commands.
//!
//! A small fixed set of leading tokens routes a composer submission away
//! from the normal send path. Anything else, including slash-looking text
//! that matches no known command, is sent to the engine verbatim.

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReviewTarget {
    BaseBranch { branch: String },
    Commit { sha: String },
    CustomInstructions { instructions: String },
    UncommittedChanges,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LspQueryKind {
    Symbols,
    Diagnostics,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LspQuery {
    pub kind: LspQueryKind,
    pub argument: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SlashCommand {
    Review { target: Option<ReviewTarget> },
    Status,
    Mcp,
    Lsp { query: LspQuery },
    Import,
    Resume { id: Option<String> },
    Fork,
    SpecRoot { path: Option<String> },
}

/// Recognize a slash command at the start of a message. `None` means the
/// text takes the normal send path.
pub fn parse_slash_command(text: &str) -> Option<SlashCommand> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('/')?;
    let (word, args) = match rest.split_once(char::is_whitespace) {
        Some((word, args)) => (word, args.trim()),
        None => (rest, ""),
    };

    match word {
        "review" => Some(SlashCommand::Review {
            target: parse_review_args(args),
        }),
        "status" => Some(SlashCommand::Status),
        "mcp" => Some(SlashCommand::Mcp),
        "lsp" => Some(SlashCommand::Lsp {
            query: parse_lsp_args(args),
        }),
        "import" => Some(SlashCommand::Import),
        "resume" => Some(SlashCommand::Resume {
            id: non_empty(args),
        }),
        "fork" => Some(SlashCommand::Fork),
        "spec-root" => Some(SlashCommand::SpecRoot {
            path: non_empty(args),
        }),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

fn parse_review_args(args: &str) -> Option<ReviewTarget> {
    if args.is_empty() {
        return None;
    }
    let (word, rest) = match args.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (args, ""),
    };
    match word {
        "base" if !rest.is_empty() => Some(ReviewTarget::BaseBranch {
            branch: rest.to_owned(),
        }),
        "commit" if !rest.is_empty() => Some(ReviewTarget::Commit {
            sha: rest.to_owned(),
        }),
        "uncommitted" => Some(ReviewTarget::UncommittedChanges),
        _ => Some(ReviewTarget::CustomInstructions {
            instructions: args.to_owned(),
        }),
    }
}

fn parse_lsp_args(args: &str) -> LspQuery {
    let (word, rest) = match args.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (args, ""),
    };
    match word {
        "symbols" => LspQuery {
            kind: LspQueryKind::Symbols,
            argument: non_empty(rest),
        },
        "diagnostics" => LspQuery {
            kind: LspQueryKind::Diagnostics,
            argument: non_empty(rest),
        },
        _ => LspQuery {
            kind: LspQueryKind::Diagnostics,
            argument: non_empty(args),
        },
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PickerKey {
    Up,
    Down,
    Enter,
    Escape,
    Char(char),
    Backspace,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReviewPickerOption {
    BaseBranch,
    Commit,
    CustomInstructions,
    UncommittedChanges,
}

impl ReviewPickerOption {
    pub const ALL: [ReviewPickerOption; 4] = [
        ReviewPickerOption::BaseBranch,
        ReviewPickerOption::Commit,
        ReviewPickerOption::CustomInstructions,
        ReviewPickerOption::UncommittedChanges,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ReviewPickerOption::BaseBranch => "Review against a base branch",
            ReviewPickerOption::Commit => "Review a specific commit",
            ReviewPickerOption::CustomInstructions => "Review with custom instructions",
            ReviewPickerOption::UncommittedChanges => "Review uncommitted changes",
        }
    }

    fn needs_argument(self) -> bool {
        !matches!(self, ReviewPickerOption::UncommittedChanges)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReviewPickerLevel {
    Root {
        highlighted: usize,
    },
    Argument {
        option: ReviewPickerOption,
        input: String,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PickerOutcome {
    Pending,
    Closed,
    Confirmed(ReviewTarget),
}

/// The `/review` picker: a root menu of four targets plus one argument
/// level for targets that need a branch, commit, or instruction text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReviewPicker {
    pub thread_id: Option<String>,
    pub level: ReviewPickerLevel,
}

impl ReviewPicker {
    pub fn new(thread_id: Option<String>) -> Self {
        Self {
            thread_id,
            level: ReviewPickerLevel::Root { highlighted: 0 },
        }
    }

    pub fn handle_key(&mut self, key: PickerKey) -> PickerOutcome {
        let count = ReviewPickerOption::ALL.len();
        match &mut self.level {
            ReviewPickerLevel::Root { highlighted } => match key {
                PickerKey::Up => {
                    *highlighted = (*highlighted + count - 1) % count;
                    PickerOutcome::Pending
                }
                PickerKey::Down => {
                    *highlighted = (*highlighted + 1) % count;
                    PickerOutcome::Pending
                }
                PickerKey::Enter => {
                    let option = ReviewPickerOption::ALL[*highlighted];
                    if option.needs_argument() {
                        self.level = ReviewPickerLevel::Argument {
                            option,
                            input: String::new(),
                        };
                        PickerOutcome::Pending
                    } else {
                        PickerOutcome::Confirmed(ReviewTarget::UncommittedChanges)
                    }
                }
                PickerKey::Escape => PickerOutcome::Closed,
                PickerKey::Char(_) | PickerKey::Backspace => PickerOutcome::Pending,
            },
            ReviewPickerLevel::Argument { option, input } => match key {
                PickerKey::Char(c) => {
                    input.push(c);
                    PickerOutcome::Pending
                }
                PickerKey::Backspace => {
                    input.pop();
                    PickerOutcome::Pending
                }
                PickerKey::Enter => {
                    let value = input.trim().to_owned();
                    if value.is_empty() {
                        return PickerOutcome::Pending;
                    }
                    let target = match option {
                        ReviewPickerOption::BaseBranch => ReviewTarget::BaseBranch { branch: value },
                        ReviewPickerOption::Commit => ReviewTarget::Commit { sha: value },
                        ReviewPickerOption::CustomInstructions => {
                            ReviewTarget::CustomInstructions {
                                instructions: value,
                            }
                        }
                        ReviewPickerOption::UncommittedChanges => ReviewTarget::UncommittedChanges,
                    };
                    PickerOutcome::Confirmed(target)
                }
                PickerKey::Escape => {
                    let back_to = ReviewPickerOption::ALL
                        .iter()
                        .position(|o| *o == *option)
                        .unwrap_or(0);
                    self.level = ReviewPickerLevel::Root {
                        highlighted: back_to,
                    };
                    PickerOutcome::Pending
                }
                PickerKey::Up | PickerKey::Down => PickerOutcome::Pending,
            },
        }
    }
}
