//! Parser for the card listing printed by libnfc's `nfc-list`.
//!
//! The line of interest looks like
//!
//! ```text
//!        UID (NFCID1): 04  a3  b2  c1
//! ```
//!
//! and the identifier is the hex bytes with the spacing removed.

use nom::{
    bytes::complete::{tag, take_till},
    character::complete::{char, hex_digit1, space0, space1},
    multi::separated_list1,
    sequence::tuple,
    IResult,
};

fn uid_line(input: &str) -> IResult<&str, String> {
    let (input, _) = tuple((space0, tag("UID"), take_till(|c| c == ':'), char(':'), space0))(input)?;
    let (input, groups) = separated_list1(space1, hex_digit1)(input)?;
    Ok((input, groups.concat()))
}

/// The first UID found in `output`, if any.
pub fn parse_uid(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| uid_line(line).ok().map(|(_, uid)| uid))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
nfc-list uses libnfc 1.8.0
NFC device: pn532_uart:/dev/ttyS0 opened
1 ISO14443A passive target(s) found:
ISO/IEC 14443A (106 kbps) target:
    ATQA (SENS_RES): 00  04
       UID (NFCID1): 04  a3  b2  c1
      SAK (SEL_RES): 08
";

    #[test]
    fn uid_from_listing() {
        assert_eq!(parse_uid(LISTING), Some("04a3b2c1".to_owned()));
    }

    #[test]
    fn seven_byte_uid_keeps_case() {
        let out = "UID (NFCID1): 04  5E  1a  22  9B  3c  80  \n";
        assert_eq!(parse_uid(out), Some("045E1a229B3c80".to_owned()));
    }

    #[test]
    fn no_target() {
        let out = "nfc-list uses libnfc 1.8.0\nNFC device: pn532_uart:/dev/ttyS0 opened\n";
        assert_eq!(parse_uid(out), None);
    }

    #[test]
    fn uid_label_without_bytes_is_ignored() {
        assert_eq!(parse_uid("UID (NFCID1):\n"), None);
    }
}
