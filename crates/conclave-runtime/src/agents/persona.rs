//! Persona table.
//!
//! A persona is data: a system prompt and a table of helper templates.
//! Every persona shares the same invocation pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RuntimeError;
use crate::prompts::{
    ARCHITECT_PROMPT, CODE_NINJA_PROMPT, MECHANIC_PROMPT, PHILOSOPHER_PROMPT, RESPONSE_FORMAT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersonaKind {
    Architect,
    Mechanic,
    CodeNinja,
    Philosopher,
}

impl PersonaKind {
    pub const ALL: [PersonaKind; 4] = [
        PersonaKind::Architect,
        PersonaKind::Mechanic,
        PersonaKind::CodeNinja,
        PersonaKind::Philosopher,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PersonaKind::Architect => "architect",
            PersonaKind::Mechanic => "mechanic",
            PersonaKind::CodeNinja => "code-ninja",
            PersonaKind::Philosopher => "philosopher",
        }
    }

    pub fn persona(self) -> &'static Persona {
        match self {
            PersonaKind::Architect => &ARCHITECT,
            PersonaKind::Mechanic => &MECHANIC,
            PersonaKind::CodeNinja => &CODE_NINJA,
            PersonaKind::Philosopher => &PHILOSOPHER,
        }
    }
}

impl fmt::Display for PersonaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonaKind {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "architect" => Ok(PersonaKind::Architect),
            "mechanic" => Ok(PersonaKind::Mechanic),
            "code-ninja" | "code_ninja" | "codeninja" => Ok(PersonaKind::CodeNinja),
            "philosopher" => Ok(PersonaKind::Philosopher),
            other => Err(RuntimeError::Configuration(format!(
                "unknown persona '{}': expected architect, mechanic, code-ninja or philosopher",
                other
            ))),
        }
    }
}

/// A named prompt template; `{input}` is replaced by the caller's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperOperation {
    pub name: &'static str,
    pub template: &'static str,
}

impl HelperOperation {
    pub fn render(&self, input: &str) -> String {
        self.template.replace("{input}", input)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Persona {
    pub kind: PersonaKind,
    pub name: &'static str,
    pub summary: &'static str,
    body: &'static str,
    pub helpers: &'static [HelperOperation],
}

impl Persona {
    /// Persona body followed by the shared reply format.
    pub fn system_prompt(&self) -> String {
        format!("{}{}", self.body.trim_end(), RESPONSE_FORMAT)
    }

    pub fn helper(&self, name: &str) -> Option<&HelperOperation> {
        self.helpers.iter().find(|h| h.name == name)
    }

    pub fn helper_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.helpers.iter().map(|h| h.name)
    }
}

static ARCHITECT: Persona = Persona {
    kind: PersonaKind::Architect,
    name: "architect",
    summary: "System design, component boundaries, scaling trade-offs",
    body: ARCHITECT_PROMPT,
    helpers: &[
        HelperOperation {
            name: "design",
            template: "Design a system that meets these requirements:\n\n{input}\n\n\
                       Cover components, data flow, storage and failure handling.",
        },
        HelperOperation {
            name: "review",
            template: "Review this architecture and name its weakest points:\n\n{input}",
        },
    ],
};

static MECHANIC: Persona = Persona {
    kind: PersonaKind::Mechanic,
    name: "mechanic",
    summary: "Debugging, root-cause analysis, minimal fixes",
    body: MECHANIC_PROMPT,
    helpers: &[
        HelperOperation {
            name: "diagnose",
            template: "Diagnose the root cause of this problem:\n\n{input}\n\n\
                       Rank your hypotheses and say how to confirm each.",
        },
        HelperOperation {
            name: "fix",
            template: "Propose the smallest safe fix for this problem:\n\n{input}",
        },
    ],
};

static CODE_NINJA: Persona = Persona {
    kind: PersonaKind::CodeNinja,
    name: "code-ninja",
    summary: "Implementation, optimisation, idiomatic code",
    body: CODE_NINJA_PROMPT,
    helpers: &[
        HelperOperation {
            name: "implement",
            template: "Implement the following. Put the full code in codeOutput.\n\n{input}",
        },
        HelperOperation {
            name: "optimize",
            template: "Optimise this code without changing its behaviour:\n\n{input}",
        },
    ],
};

static PHILOSOPHER: Persona = Persona {
    kind: PersonaKind::Philosopher,
    name: "philosopher",
    summary: "Assumptions, reasoning quality, counter-arguments",
    body: PHILOSOPHER_PROMPT,
    helpers: &[
        HelperOperation {
            name: "evaluate",
            template: "Evaluate the reasoning in the following. What holds, what does not?\n\n{input}",
        },
        HelperOperation {
            name: "question",
            template: "List the questions that must be answered before acting on this:\n\n{input}",
        },
    ],
};
