//! Parsing of `.org` genome files.
//!
//! An `.org` file lists one instruction mnemonic per line. Everything after
//! `#` is a comment and blank lines are ignored.

use orgscope_types::Genome;

use crate::instruction::Instruction;

/// Errors raised while parsing an `.org` file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrgParseError {
    /// A line named an instruction outside the instruction set.
    #[error("line {line}: unknown instruction {mnemonic:?}")]
    UnknownMnemonic {
        /// One-based line number.
        line: usize,
        /// The unrecognised mnemonic.
        mnemonic: String,
    },
}

/// Parse `.org` text into a genome.
///
/// # Errors
///
/// Returns [`OrgParseError::UnknownMnemonic`] on the first line that does
/// not name a known instruction.
pub fn parse_org(text: &str) -> Result<Genome, OrgParseError> {
    let mut symbols = String::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let instruction =
            Instruction::from_mnemonic(line).ok_or_else(|| OrgParseError::UnknownMnemonic {
                line: index.saturating_add(1),
                mnemonic: line.to_owned(),
            })?;
        symbols.push(instruction.symbol());
    }
    Ok(Genome::new(symbols))
}

/// Render a genome as `.org` text; unknown symbols become `# ?` lines.
pub fn to_org(genome: &Genome) -> String {
    genome
        .symbols()
        .iter()
        .map(|&symbol| {
            Instruction::from_symbol(symbol)
                .map_or_else(|| format!("# ? {}\n", char::from(symbol)), |i| {
                    format!("{}\n", i.mnemonic())
                })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_mnemonics_and_skips_comments() {
        let text = "# ancestor\nh-alloc\n\nh-copy   # copy one\nh-divide\n";
        let genome = parse_org(text).unwrap();
        assert_eq!(genome.as_str(), "wvx");
    }

    #[test]
    fn reports_unknown_line() {
        let err = parse_org("nop-A\nhalt\n").unwrap_err();
        assert_eq!(
            err,
            OrgParseError::UnknownMnemonic {
                line: 2,
                mnemonic: String::from("halt")
            }
        );
    }

    #[test]
    fn renders_back_to_org() {
        let genome = Genome::new("ayz");
        assert_eq!(to_org(&genome), "nop-A\nIO\nh-search\n");
        assert_eq!(parse_org(&to_org(&genome)).unwrap(), genome);
    }
}
