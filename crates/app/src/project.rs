use phonescan_core::PhoneNumber;
use phonescan_ocr::ScanResult;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

const NO_NUMBERS: &str = "No phone numbers detected.";

#[derive(Serialize)]
struct NumberView<'a> {
    number: &'a str,
    dial: String,
}

/// Render the numbers of one scan for the terminal.
pub fn render_result(result: &ScanResult, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(&result.numbers)),
        OutputFormat::Json => serde_json::to_string_pretty(result),
    }
}

/// Render a bare list of numbers (no scan metadata).
pub fn render_numbers(numbers: &[PhoneNumber], format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(numbers)),
        OutputFormat::Json => {
            let views: Vec<NumberView<'_>> = numbers
                .iter()
                .map(|n| NumberView { number: n.as_str(), dial: n.dial_string() })
                .collect();
            serde_json::to_string_pretty(&views)
        }
    }
}

fn render_text(numbers: &[PhoneNumber]) -> String {
    if numbers.is_empty() {
        return NO_NUMBERS.to_string();
    }
    numbers
        .iter()
        .map(|n| format!("{n}\t{}", n.tel_uri()))
        .collect::<Vec<_>>()
        .join("\n")
}
