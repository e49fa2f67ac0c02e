use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Print `key  value` lines with the keys padded to a common width.
pub fn print_pairs(pairs: &[(&str, String)]) {
    print!("{}", format_pairs(pairs));
}

fn format_pairs(pairs: &[(&str, String)]) -> String {
    let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    pairs
        .iter()
        .map(|(key, value)| format!("{key:width$}  {value}\n"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_aligned() {
        let out = format_pairs(&[("port", "4000".into()), ("event_buffer", "64".into())]);
        assert_eq!(out, "port          4000\nevent_buffer  64\n");
    }

    #[test]
    fn no_pairs_prints_nothing() {
        assert_eq!(format_pairs(&[]), "");
    }
}
