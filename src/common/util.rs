// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

/// Splits a command payload into the chunks written one by one to the
/// printer. Every piece gets the delimiter re-appended, including the last.
pub fn split_command(payload: &str, delimiter: &str) -> Vec<String> {
    if delimiter.is_empty() {
        return vec![payload.to_string()];
    }
    payload
        .split(delimiter)
        .map(|line| format!("{}{}", line, delimiter))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_reappends_delimiter() {
        assert_eq!(
            split_command("! 0 200 200 210 1\t\nPRINT", "\t\n"),
            vec!["! 0 200 200 210 1\t\n", "PRINT\t\n"]
        );
    }

    #[test]
    fn trailing_delimiter_yields_bare_chunk() {
        assert_eq!(split_command("PRINT\t\n", "\t\n"), vec!["PRINT\t\n", "\t\n"]);
    }

    #[test]
    fn empty_delimiter_sends_whole_payload() {
        assert_eq!(split_command("a\nb", ""), vec!["a\nb"]);
    }
}
