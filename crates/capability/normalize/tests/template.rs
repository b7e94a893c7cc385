use mfx_normalize::{NormalizeError, Subscription, Template, TemplateContext};

const JSON_PAYLOAD: &str = r#"{
  "x": "y",
  "foo": {
    "bar": "value",
    "intvalue": 123,
    "floatvalue": 1.5,
    "flag": true,
    "nothing": null,
    "arr": [1, 2, 3]
  }
}"#;

#[test]
fn topic_segments() {
    let subscription = Subscription::new("foo/bar/baz", "{{.Topic 2}}")
        .with_tag("invalid", "{{.Topic 4}}");
    let ctx = TemplateContext::new(&subscription, "foo/bar/baz", "123");
    let templates = subscription.compiled().expect("compile");

    let result = templates.measurement().execute(&ctx).expect("measurement");
    assert_eq!(result, "baz");

    let err = templates
        .tag("invalid")
        .expect("tag template")
        .execute(&ctx)
        .expect_err("out of range");
    assert!(matches!(err, NormalizeError::IndexOutOfRange { index: 4, .. }));
}

#[test]
fn topic_segment_rejects_negative_index() {
    let subscription = Subscription::default();
    let ctx = TemplateContext::new(&subscription, "foo/bar/baz", "");
    assert_eq!(ctx.topic(0).expect("first"), "foo");
    assert!(matches!(
        ctx.topic(-1),
        Err(NormalizeError::IndexOutOfRange { .. })
    ));
    assert!(matches!(
        ctx.topic(3),
        Err(NormalizeError::IndexOutOfRange { .. })
    ));
}

#[test]
fn json_paths() {
    let subscription = Subscription::default();
    let ctx = TemplateContext::new(&subscription, "foo/bar/baz", JSON_PAYLOAD);

    let cases = [
        ("x", "y"),
        ("foo.bar", "value"),
        ("foo.intvalue", "123"),
        ("foo.floatvalue", "1.5"),
        ("foo.flag", "true"),
        ("foo.arr.1", "2"),
    ];
    for (path, expected) in cases {
        assert_eq!(ctx.json(path).expect(path), expected, "path {}", path);
    }
}

#[test]
fn json_missing_paths_fail() {
    let subscription = Subscription::default();
    let ctx = TemplateContext::new(&subscription, "foo/bar/baz", JSON_PAYLOAD);

    for path in [
        "doesnotexist.foo.bar",
        "nope.x",
        "foo.nonexist",
        "foo.bar.baz",
        "foo.arr.9",
        "foo.arr.x",
        "foo",
        "foo.arr",
        "foo.nothing",
    ] {
        assert!(
            matches!(ctx.json(path), Err(NormalizeError::KeyNotFound { .. })),
            "path {}",
            path
        );
    }

    let err = ctx.json("nope.x").expect_err("missing");
    assert_eq!(
        err,
        NormalizeError::KeyNotFound {
            key: "nope".to_string(),
            path: "nope.x".to_string(),
        }
    );
}

#[test]
fn json_invalid_payload() {
    let subscription = Subscription::default();
    let ctx = TemplateContext::new(&subscription, "foo/bar/baz", "this is not JSON");
    assert!(matches!(ctx.json("foo"), Err(NormalizeError::Parse(_))));
}

#[test]
fn json_array_root() {
    let subscription = Subscription::default();
    let ctx = TemplateContext::new(&subscription, "a", r#"[{"v": 7}]"#);
    assert_eq!(ctx.json("0.v").expect("array root"), "7");
}

#[test]
fn csv_columns() {
    let subscription = Subscription::default();
    let ctx = TemplateContext::new(&subscription, "foo/bar/baz", "123,5.5,abc");
    for (index, expected) in ["123", "5.5", "abc"].iter().enumerate() {
        assert_eq!(&ctx.csv(index as i64).expect("column"), expected);
    }

    assert!(matches!(
        ctx.csv(4),
        Err(NormalizeError::IndexOutOfRange { index: 4, count: 3, .. })
    ));
    assert!(matches!(
        ctx.csv(-1),
        Err(NormalizeError::IndexOutOfRange { .. })
    ));
}

#[test]
fn csv_empty_payload() {
    let subscription = Subscription::default();
    let ctx = TemplateContext::new(&subscription, "foo/bar/baz", "");
    assert!(matches!(ctx.csv(0), Err(NormalizeError::Parse(_))));
}

#[test]
fn csv_invalid_separator_checked_first() {
    let subscription = Subscription::default().with_csv_separator("++");
    let ctx = TemplateContext::new(&subscription, "foo", "");
    assert!(matches!(ctx.csv(0), Err(NormalizeError::Validation(_))));
}

#[test]
fn template_mixes_text_and_actions() {
    let subscription = Subscription::default();
    let ctx = TemplateContext::new(&subscription, "home/kitchen/temp", r#"{"unit":"C"}"#);
    let template =
        Template::parse("measurement", r#"{{.Topic 1}}_{{ .Topic 2 }}_{{JSON "unit"}}"#)
            .expect("parse");
    assert_eq!(template.name(), "measurement");
    assert_eq!(template.execute(&ctx).expect("execute"), "kitchen_temp_C");
}

#[test]
fn template_literal_only() {
    let subscription = Subscription::default();
    let ctx = TemplateContext::new(&subscription, "a/b", "1");
    let template = Template::parse("measurement", "power").expect("parse");
    assert_eq!(template.execute(&ctx).expect("execute"), "power");
}

#[test]
fn template_full_topic_and_payload() {
    let subscription = Subscription::default();
    let ctx = TemplateContext::new(&subscription, "a/b", "42");
    let template = Template::parse("t", "{{.FullTopic}}={{.Payload}}").expect("parse");
    assert_eq!(template.execute(&ctx).expect("execute"), "a/b=42");
}

#[test]
fn template_trim_markers_and_comments() {
    let subscription = Subscription::default();
    let ctx = TemplateContext::new(&subscription, "a/b", "");
    let template = Template::parse("t", "x  {{- .Topic 1 -}}  y{{/* ignored */}}").expect("parse");
    assert_eq!(template.execute(&ctx).expect("execute"), "xby");
}

#[test]
fn template_syntax_errors() {
    for text in [
        "{{.Topic 1",
        "{{}}",
        "{{.Unknown 1}}",
        "{{.Topic \"1\"}}",
        "{{.JSON 1}}",
        "{{.JSON \"unterminated}}",
        "{{.CSV}}",
        "{{.Payload 1}}",
    ] {
        assert!(
            matches!(Template::parse("t", text), Err(NormalizeError::Parse(_))),
            "text {:?}",
            text
        );
    }
}
