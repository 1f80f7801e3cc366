//! Action chain parsing.
//!
//! A chain is a comma-separated list of action names. Reserved tokens are
//! resolved locally instead of being sent to the server:
//!
//! | token | placement | effect |
//! |---|---|---|
//! | `sync` | first | flush pending edits, drop the cached context |
//! | `validate` | anywhere | field validation only |
//! | `save` | anywhere | full save pipeline |
//! | `new` | last | install a blank record |
//! | `close` | last | close the current view |

use crate::error::{ChainError, ChainResult};
use std::fmt;
use std::str::FromStr;

/// One step of an action chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStep {
    /// Flush pending edits and drop the cached context.
    Sync,
    /// Field validation without a write.
    Validate,
    /// Full save pipeline.
    Save,
    /// Install a blank record.
    New,
    /// Close the current view.
    Close,
    /// Named remote action.
    Action(String),
}

impl ChainStep {
    fn from_token(token: &str) -> Self {
        match token {
            "sync" => ChainStep::Sync,
            "validate" => ChainStep::Validate,
            "save" => ChainStep::Save,
            "new" => ChainStep::New,
            "close" => ChainStep::Close,
            name => ChainStep::Action(name.to_string()),
        }
    }

    /// Returns the token of this step.
    pub fn token(&self) -> &str {
        match self {
            ChainStep::Sync => "sync",
            ChainStep::Validate => "validate",
            ChainStep::Save => "save",
            ChainStep::New => "new",
            ChainStep::Close => "close",
            ChainStep::Action(name) => name,
        }
    }

    /// Returns true for steps resolved without a remote call.
    pub fn is_reserved(&self) -> bool {
        !matches!(self, ChainStep::Action(_))
    }
}

/// A parsed action chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionChain {
    steps: Vec<ChainStep>,
}

impl ActionChain {
    /// Parses a chain, checking reserved token placement.
    ///
    /// Blank tokens are dropped.
    pub fn parse(text: &str) -> ChainResult<Self> {
        let steps: Vec<ChainStep> = text
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(ChainStep::from_token)
            .collect();

        let last = steps.len().saturating_sub(1);
        for (index, step) in steps.iter().enumerate() {
            match step {
                ChainStep::Sync if index != 0 => {
                    return Err(ChainError::syntax(format!(
                        "\"sync\" must be the first action in \"{text}\""
                    )));
                }
                ChainStep::New | ChainStep::Close if index != last => {
                    return Err(ChainError::syntax(format!(
                        "\"{}\" must be the last action in \"{text}\"",
                        step.token()
                    )));
                }
                _ => {}
            }
        }
        Ok(Self { steps })
    }

    /// Returns the steps.
    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    /// Consumes the chain and returns its steps.
    pub fn into_steps(self) -> Vec<ChainStep> {
        self.steps
    }

    /// Returns true if the chain has no step.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns the number of remote action calls.
    pub fn remote_calls(&self) -> usize {
        self.steps.iter().filter(|s| !s.is_reserved()).count()
    }
}

impl FromStr for ActionChain {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ActionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, step) in self.steps.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            f.write_str(step.token())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_trims() {
        let chain = ActionChain::parse(" sync, check-code ,,save ").unwrap();
        assert_eq!(
            chain.steps(),
            &[
                ChainStep::Sync,
                ChainStep::Action("check-code".into()),
                ChainStep::Save
            ]
        );
        assert_eq!(chain.to_string(), "sync,check-code,save");
        assert_eq!(chain.remote_calls(), 1);
    }

    #[test]
    fn sync_must_be_first() {
        assert!(matches!(
            ActionChain::parse("foo,sync,bar"),
            Err(ChainError::Syntax { .. })
        ));
        assert!(ActionChain::parse("sync,foo,bar").is_ok());
    }

    #[test]
    fn new_and_close_must_be_last() {
        assert!(ActionChain::parse("foo,new").is_ok());
        assert!(ActionChain::parse("foo,close").is_ok());
        assert!(ActionChain::parse("new,foo").is_err());
        assert!(ActionChain::parse("close,foo").is_err());
        assert!(ActionChain::parse("new,close").is_err());
    }

    #[test]
    fn empty_chain() {
        let chain: ActionChain = " , ".parse().unwrap();
        assert!(chain.is_empty());
        assert_eq!(chain.len(), 0);
    }
}
