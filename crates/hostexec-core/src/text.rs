//! Output line handling.
//!
//! Every text-returning operation splits on `\n` (which also covers `\r\n`)
//! and trims each line.

/// Split command output into trimmed lines, keeping empty ones.
pub fn split_lines(output: &str) -> Vec<String> {
    output.split('\n').map(|l| l.trim().to_string()).collect()
}

/// Split command output into trimmed lines, dropping empty ones.
pub fn non_empty_lines(output: &str) -> Vec<String> {
    output
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
