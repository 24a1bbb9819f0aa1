//! 问候语与元问题识别，命中后不进入分析链路

const GREETING_PATTERNS: &[&str] = &[
    "hi",
    "hii",
    "hello",
    "hey",
    "hey there",
    "good morning",
    "good afternoon",
    "good evening",
    "who are you",
    "what are you",
    "what can you do",
    "what do you do",
    "how can you help",
];

/// 只有整句恰好是这些词时才算问候，"help me find ..." 之类是正常提问
const WHOLE_QUESTION_PATTERNS: &[&str] = &["help", "thanks", "thank you", "greetings"];

pub const GREETING_TITLE: &str = "Hello!";

pub const GREETING_REPLY: &[&str] = &[
    "Hello! I'm your academic data assistant.",
    "Ask me a question about students, programs, courses or semester results, for example \"How many students passed semester 1 in 2023?\", and I'll query the database and pick the best way to show the answer.",
];

/// 大小写不敏感，整句相等或以某个模式开头 (模式后必须是非字母数字字符)
pub fn is_greeting(question: &str) -> bool {
    let q = question
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase();

    if WHOLE_QUESTION_PATTERNS.contains(&q.as_str()) {
        return true;
    }
    GREETING_PATTERNS.iter().any(|pattern| match q.strip_prefix(pattern) {
        Some(rest) => rest.is_empty() || rest.starts_with(|c: char| !c.is_alphanumeric()),
        None => false,
    })
}
