// FleetConsole/src/validation.rs

//! 输入校验。

/// 设备序列号的长度 (十六进制字符)。
pub const SERIAL_NUMBER_LENGTH: usize = 12;

/// 是否为合法的序列号片段：非空、不超过 12 个字符且全部为十六进制字符 (大小写均可)。
pub fn is_serial_number_fragment(input: &str) -> bool {
    !input.is_empty() && input.len() <= SERIAL_NUMBER_LENGTH && input.chars().all(|c| c.is_ascii_hexdigit())
}

/// 是否为完整的序列号。
pub fn is_serial_number(input: &str) -> bool {
    input.len() == SERIAL_NUMBER_LENGTH && is_serial_number_fragment(input)
}
