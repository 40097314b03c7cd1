//! Desired-contract summary.
//!
//! Sorts sentences of a free-text "what kind of contract do you want" note
//! into four IP viewpoints by keyword. Sentences are quoted verbatim, never
//! paraphrased; an empty viewpoint is marked `記載なし` and produces a
//! follow-up question (at most three in total).

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

const FACTS_PER_VIEWPOINT: usize = 3;
const MAX_QUESTIONS: usize = 3;
const NOT_STATED: &str = "記載なし";

static SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[。！？\n]").expect("sentence pattern is valid"));

const IP_AIM_KEYWORDS: &[&str] = &[
    "知財", "特許", "出願", "権利化", "権利帰属", "ライセンス", "実施許諾", "譲渡", "売買", "保証",
    "表明", "補償", "ノウハウ", "著作権", "商標", "秘密", "NDA", "機密保持",
];

const SCOPE_KEYWORDS: &[&str] = &[
    "実施", "許諾", "サブライセンス", "対象", "範囲", "地域", "期間", "用途", "製品", "当社製品",
    "相手の製品", "顧客", "双方", "第三者", "量産", "販売", "提供",
];

const RISK_KEYWORDS: &[&str] = &[
    "リスク", "支障", "障害", "第三者", "権利行使", "侵害", "紛争", "コンタミ", "混入", "実施料",
    "ロイヤリティ", "費用", "損害", "補償", "無効", "抵触", "FTO",
];

struct Viewpoint {
    title: &'static str,
    question: &'static str,
}

const VIEWPOINTS: [Viewpoint; 4] = [
    Viewpoint {
        title: "1. 知財活動上の目論見（知財創出/権利化/ライセンス/知財売買/知財保証/・・・）",
        question: "（どんな契約にしたいか補足）知財の取り扱い方針（創出/権利化/ライセンス/売買/保証）のうち、今回の目標は何ですか？",
    },
    Viewpoint {
        title: "2. 追加で重視したい知財上の事項（ノウハウ帰属/譲渡可否/保証範囲/・・・）",
        question: "（どんな契約にしたいか補足）知財面で追加で重視したい事項（例: ノウハウ帰属、譲渡可否、保証範囲）がありますか？",
    },
    Viewpoint {
        title: "3. 上記に関する事業上の実施や許諾の内容（当社製品が実施品/相手や顧客の製品が実施品/双方の製品が実施品/・・・）",
        question: "（どんな契約にしたいか補足）実施・許諾の対象と範囲（当社製品/相手製品/双方、地域・期間、サブライセンス可否）を教えてください。",
    },
    Viewpoint {
        title: "4. 上記から生じ得る知財上のリスク（自己実施上の支障/第三者による実施/コンタミ/第三者からの権利行使/実施料の発生/・・・）",
        question: "（どんな契約にしたいか補足）想定リスク（自己実施の支障、第三者権利、コンタミ、実施料 等）があれば列挙してください。",
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewpointSection {
    pub title: String,
    /// Quoted sentences; empty when the text says nothing on this point.
    pub facts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredContractSummary {
    pub sections: Vec<ViewpointSection>,
    pub follow_up_questions: Vec<String>,
}

impl DesiredContractSummary {
    /// Sections as `title` followed by `- fact` bullets, blank line between.
    pub fn to_text(&self) -> String {
        self.sections
            .iter()
            .map(|section| {
                let bullets = if section.facts.is_empty() {
                    format!("- {NOT_STATED}")
                } else {
                    section
                        .facts
                        .iter()
                        .map(|f| format!("- {f}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                format!("{}\n{bullets}", section.title)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    SENTENCE_BREAK
        .split(text)
        .map(|s| s.trim_matches(|c: char| c.is_whitespace()))
        .filter(|s| !s.is_empty())
        .collect()
}

fn collect_matches<'a>(sentences: &[&'a str], keywords: &[&str]) -> Vec<&'a str> {
    sentences
        .iter()
        .filter(|s| keywords.iter().any(|k| s.contains(k)))
        .take(FACTS_PER_VIEWPOINT)
        .copied()
        .collect()
}

pub fn summarize_desired_contract(text: &str) -> DesiredContractSummary {
    let sentences = split_sentences(text);

    let aims = collect_matches(&sentences, IP_AIM_KEYWORDS);
    let remaining: Vec<&str> = sentences
        .iter()
        .filter(|s| !aims.contains(*s))
        .copied()
        .collect();
    let further_aims = collect_matches(&remaining, IP_AIM_KEYWORDS);
    let scope = collect_matches(&sentences, SCOPE_KEYWORDS);
    let risks = collect_matches(&sentences, RISK_KEYWORDS);

    let facts = [aims, further_aims, scope, risks];
    let sections = VIEWPOINTS
        .iter()
        .zip(&facts)
        .map(|(viewpoint, found)| ViewpointSection {
            title: viewpoint.title.to_string(),
            facts: found.iter().map(|s| s.to_string()).collect(),
        })
        .collect();
    let follow_up_questions = VIEWPOINTS
        .iter()
        .zip(&facts)
        .filter(|(_, found)| found.is_empty())
        .map(|(viewpoint, _)| viewpoint.question.to_string())
        .take(MAX_QUESTIONS)
        .collect();

    DesiredContractSummary {
        sections,
        follow_up_questions,
    }
}
