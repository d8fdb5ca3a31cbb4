use entitykit_core::{Predicate, PredicateBuilder, PredicateOperator, PredicateValue};

#[test]
fn parses_comparisons_and_keywords() {
    let predicate =
        Predicate::parse("title = 'Dune' and rating >= 4.5 OR available == no").unwrap();

    assert_eq!(predicate.condition_count(), 3);
    assert_eq!(
        predicate.arguments(),
        &[
            PredicateValue::Text("Dune".to_string()),
            PredicateValue::Real(4.5),
            PredicateValue::Bool(false),
        ]
    );
}

#[test]
fn parsed_predicate_matches_builder_output() {
    let parsed = Predicate::parse("(year < 1990 || year > 2000) && title CONTAINS \"x\"").unwrap();
    let built = PredicateBuilder::new()
        .begin_group()
        .condition("year", PredicateOperator::LessThan, 1990)
        .or()
        .condition("year", PredicateOperator::GreaterThan, 2000)
        .end_group()
        .and()
        .condition("title", PredicateOperator::Contains, "x")
        .build()
        .unwrap();

    assert_eq!(parsed, built);
}

#[test]
fn display_output_parses_back() {
    let original = PredicateBuilder::new()
        .condition("meta.tags", PredicateOperator::Contains, "sci\"fi")
        .and()
        .between("year", -5, 12.25)
        .and()
        .condition("sequel", PredicateOperator::Equals, PredicateValue::Null)
        .build()
        .unwrap();

    let reparsed = Predicate::parse(&original.to_string()).unwrap();
    assert_eq!(reparsed, original);
}

#[test]
fn leading_connective_is_a_syntax_error() {
    let err = Predicate::parse("AND year == 1").unwrap_err();
    assert_eq!(err.position, 0);
}

#[test]
fn incomplete_between_names_missing_token() {
    let err = Predicate::parse("year BETWEEN {1 2}").unwrap_err();
    assert_eq!(err.position, 16);
    assert!(err.message.contains("`,`"));
}

#[test]
fn structural_errors_point_past_the_input() {
    let input = "year == 1 OR";
    let err = Predicate::parse(input).unwrap_err();
    assert_eq!(err.position, input.len());
}

#[test]
fn unterminated_string_reports_its_start() {
    let err = Predicate::parse("title == 'Dune").unwrap_err();
    assert_eq!(err.position, 9);
}

#[test]
fn invalid_attribute_path_is_rejected() {
    assert!(Predicate::parse("title..x == 1").is_err());
}

#[test]
fn parses_inequality_and_negation() {
    let parsed =
        Predicate::parse("NOT (status != 'done' OR owner <> NIL) AND !year == 1").unwrap();
    let built = PredicateBuilder::new()
        .not()
        .begin_group()
        .condition("status", PredicateOperator::NotEquals, "done")
        .or()
        .condition("owner", PredicateOperator::NotEquals, PredicateValue::Null)
        .end_group()
        .and()
        .not()
        .condition("year", PredicateOperator::Equals, 1)
        .build()
        .unwrap();

    assert_eq!(parsed, built);
    assert_eq!(Predicate::parse(&parsed.to_string()).unwrap(), parsed);
}

#[test]
fn negation_needs_an_operand() {
    let input = "year == 1 AND NOT";
    assert_eq!(Predicate::parse(input).unwrap_err().position, input.len());
    assert!(Predicate::parse("NOT OR year == 1").is_err());
    assert!(Predicate::parse("year NOT == 1").is_err());
}
