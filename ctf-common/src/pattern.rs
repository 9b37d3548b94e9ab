//! 虚拟机名称模式匹配

/// 检查名称是否匹配模式
///
/// 支持的模式：
/// - `*` 匹配全部
/// - `prefix*` 前缀匹配
/// - `*suffix` 后缀匹配
/// - `*middle*` 包含匹配
/// - `exact` 精确匹配
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let starts_with_star = pattern.starts_with('*');
    let ends_with_star = pattern.ends_with('*');

    match (starts_with_star, ends_with_star) {
        (true, true) if pattern.len() > 2 => name.contains(&pattern[1..pattern.len() - 1]),
        (true, true) => true,
        (true, false) => name.ends_with(&pattern[1..]),
        (false, true) => name.starts_with(&pattern[..pattern.len() - 1]),
        (false, false) => name == pattern,
    }
}
