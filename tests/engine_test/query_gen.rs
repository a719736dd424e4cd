use proptest::collection::vec;
use proptest::prelude::BoxedStrategy;
use proptest::prop_oneof;
use proptest::sample::select;
use proptest::strategy::Just;
use proptest::strategy::Strategy;

use counterdex::analyzis::Analyzer;
use counterdex::search::BooleanQuery;
use counterdex::search::MatchAllDocsQuery;
use counterdex::search::Query;
use counterdex::search::TermQuery;
use counterdex::search::ValueQuery;

/// Words the generated documents are built from, so that generated queries
/// hit something most of the time.
pub const WORDS: &[&str] = &[
    "available", "bytes", "cache", "faults", "memory", "page", "pages", "processor", "time",
    "committed", "the", "interrupts", "disk", "queue",
];

pub fn match_all_docs() -> BoxedStrategy<Box<dyn Query>> {
    Just(Box::new(MatchAllDocsQuery::new()) as Box<dyn Query>).boxed()
}

pub fn value_query(
    field_name: &'static str,
    values: &'static [&'static str],
) -> BoxedStrategy<Box<dyn Query>> {
    select(values)
        .prop_map(move |value| Box::new(ValueQuery::new(field_name, value)) as Box<dyn Query>)
        .boxed()
}

fn words() -> BoxedStrategy<String> {
    vec(select(WORDS), 1..3)
        .prop_map(|words| words.join(" "))
        .boxed()
}

pub fn term_query(
    field_name: &'static str,
    analyzer: Box<dyn Analyzer>,
) -> BoxedStrategy<Box<dyn Query>> {
    words()
        .prop_map(move |text| {
            Box::new(TermQuery::new(field_name, text, analyzer.clone())) as Box<dyn Query>
        })
        .boxed()
}

pub fn any_field_query(analyzer: Box<dyn Analyzer>) -> BoxedStrategy<Box<dyn Query>> {
    words()
        .prop_map(move |text| {
            Box::new(TermQuery::any_field(text, analyzer.clone())) as Box<dyn Query>
        })
        .boxed()
}

pub fn boolean_query(analyzer: Box<dyn Analyzer>) -> BoxedStrategy<Box<dyn Query>> {
    let clause = prop_oneof![
        term_query("name", analyzer.clone()),
        term_query("category", analyzer.clone()),
        any_field_query(analyzer),
    ]
    .boxed();
    (vec(clause.clone(), 0..3), vec(clause, 0..3))
        .prop_filter("Needs at least one clause", |(must, should)| {
            !must.is_empty() || !should.is_empty()
        })
        .prop_map(|(must, should)| {
            let query = must.into_iter().fold(BooleanQuery::new(), |q, c| q.must(c));
            let query = should.into_iter().fold(query, |q, c| q.should(c));
            Box::new(query) as Box<dyn Query>
        })
        .boxed()
}

pub fn any_query(analyzer: Box<dyn Analyzer>) -> BoxedStrategy<Box<dyn Query>> {
    prop_oneof![
        match_all_docs(),
        value_query("_type", &["counter", "instance"]),
        term_query("name", analyzer.clone()),
        term_query("help", analyzer.clone()),
        any_field_query(analyzer.clone()),
        boolean_query(analyzer),
    ]
    .boxed()
}
