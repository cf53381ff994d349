// SPDX-License-Identifier: MIT
//! Index-list grammar
//!
//! ```text
//! index_list := external | packed
//! external   := "E" path
//! packed     := hex ("+" hex)*
//! hex        := [0-9a-f]+
//! ```
//!
//! `"3+a"` is group 3 merged with group 10, group 10 winning on collisions.
//! Hex digits are lowercase so that the external marker `E` is unambiguous.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{ContainerError, Result};

const EXTERNAL_MARKER: char = 'E';

/// A parsed index list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupReference {
    /// Packed groups to fold left-to-right
    Packed(Vec<usize>),
    /// A path on the host filesystem, bypassing the container
    External(PathBuf),
}

impl GroupReference {
    pub fn parse(input: &str) -> Result<Self> {
        if let Some(path) = input.strip_prefix(EXTERNAL_MARKER) {
            if path.is_empty() {
                return Err(invalid(input, "external reference has no path"));
            }
            return Ok(GroupReference::External(PathBuf::from(path)));
        }

        if input.is_empty() {
            return Err(invalid(input, "empty index list"));
        }

        input
            .split('+')
            .map(|token| parse_index(input, token))
            .collect::<Result<Vec<_>>>()
            .map(GroupReference::Packed)
    }
}

impl FromStr for GroupReference {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for GroupReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupReference::External(path) => write!(f, "{}{}", EXTERNAL_MARKER, path.display()),
            GroupReference::Packed(indices) => {
                for (i, index) in indices.iter().enumerate() {
                    if i > 0 {
                        f.write_str("+")?;
                    }
                    write!(f, "{:x}", index)?;
                }
                Ok(())
            }
        }
    }
}

fn parse_index(input: &str, token: &str) -> Result<usize> {
    if token.is_empty() {
        return Err(invalid(input, "empty group index"));
    }
    if !token.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(invalid(
            input,
            &format!("{:?} is not a lowercase hexadecimal group index", token),
        ));
    }
    usize::from_str_radix(token, 16)
        .map_err(|_| invalid(input, &format!("group index {:?} out of range", token)))
}

fn invalid(input: &str, reason: &str) -> ContainerError {
    ContainerError::config(format!("Invalid index list {:?}: {}", input, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_and_multiple() {
        assert_eq!(GroupReference::parse("0").unwrap(), GroupReference::Packed(vec![0]));
        assert_eq!(
            GroupReference::parse("3+a+1f").unwrap(),
            GroupReference::Packed(vec![3, 10, 31])
        );
    }

    #[test]
    fn test_external() {
        assert_eq!(
            GroupReference::parse("E/opt/lib/foo.jar").unwrap(),
            GroupReference::External(PathBuf::from("/opt/lib/foo.jar"))
        );
        assert!(GroupReference::parse("E").is_err());
    }

    #[test]
    fn test_malformed() {
        for input in ["", "+", "1+", "+1", "1++2", "g", "A", "1 + 2", "-1"] {
            let err = GroupReference::parse(input).unwrap_err();
            assert!(matches!(err, ContainerError::Config(_)), "{:?}", input);
            assert!(err.to_string().contains(&format!("{:?}", input)));
        }
    }

    #[test]
    fn test_display_round_trip() {
        let reference = GroupReference::Packed(vec![3, 10]);
        assert_eq!(reference.to_string(), "3+a");
        assert_eq!(reference.to_string().parse::<GroupReference>().unwrap(), reference);
    }
}
