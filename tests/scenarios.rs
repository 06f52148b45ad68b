//! End-to-end scenarios: compile a schema, validate documents, inspect
//! the violation lists.

use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;
use xsdstream::{compile_schema, Error, RuntimeOptions, Schema, ViolationCode};

const PERSON: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="person">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="name" type="xs:string"/>
        <xs:element name="age" type="xs:integer"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

const KEYED: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="root">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="item" minOccurs="0" maxOccurs="unbounded">
          <xs:complexType>
            <xs:attribute name="id" type="xs:string"/>
            <xs:attribute name="ref" type="xs:string"/>
          </xs:complexType>
        </xs:element>
      </xs:sequence>
    </xs:complexType>
    <xs:key name="itemKey">
      <xs:selector xpath="item"/>
      <xs:field xpath="@id"/>
    </xs:key>
    <xs:keyref name="itemRef" refer="itemKey">
      <xs:selector xpath="item"/>
      <xs:field xpath="@ref"/>
    </xs:keyref>
  </xs:element>
</xs:schema>"#;

fn compile(text: &str) -> Schema {
    match compile_schema(text.as_bytes()) {
        Ok(schema) => schema,
        Err(e) => panic!("schema failed to compile: {}", e),
    }
}

fn codes(schema: &Schema, doc: &str) -> Vec<ViolationCode> {
    schema.validate(doc.as_bytes(), &RuntimeOptions::default()).codes()
}

#[test]
fn test_valid_simple_content() {
    let schema = compile(PERSON);
    assert_eq!(codes(&schema, "<person><name>Jo</name><age>30</age></person>"), vec![]);
}

#[test]
fn test_unexpected_element_order() {
    let schema = compile(PERSON);
    let list = schema.validate(
        "<person><age>30</age><name>Jo</name></person>".as_bytes(),
        &RuntimeOptions::default(),
    );
    assert_eq!(list.count_code(ViolationCode::UnexpectedElement), 1);
    let first = list.iter().next().unwrap();
    assert_eq!(first.code, ViolationCode::UnexpectedElement);
    assert_eq!(first.line, 1);
    assert_eq!(first.column, 9);
    assert_eq!(first.path.as_deref(), Some("/person/age"));
    assert!(first.message.contains("name"));
}

#[test]
fn test_identity_key_duplicate() {
    let schema = compile(KEYED);
    let list = schema.validate(
        r#"<root><item id="a"/><item id="a"/></root>"#.as_bytes(),
        &RuntimeOptions::default(),
    );
    assert_eq!(list.codes(), vec![ViolationCode::DuplicateKey]);
    assert!(list.iter().next().unwrap().message.contains("itemKey"));
}

#[test]
fn test_keyref_resolves() {
    let schema = compile(KEYED);
    assert_eq!(codes(&schema, r#"<root><item id="a" ref="a"/></root>"#), vec![]);
    assert_eq!(
        codes(&schema, r#"<root><item id="a" ref="b"/></root>"#),
        vec![ViolationCode::UnresolvedKeyref]
    );
}

#[test]
fn test_list_length_facet() {
    let schema = |default: &str| {
        format!(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:simpleType name="pair">
    <xs:restriction base="xs:NMTOKENS">
      <xs:length value="2"/>
    </xs:restriction>
  </xs:simpleType>
  <xs:element name="tokens" type="pair" default="{}"/>
</xs:schema>"#,
            default
        )
    };
    let ok = compile(&schema("a b"));
    assert_eq!(codes(&ok, "<tokens/>"), vec![]);
    assert_eq!(codes(&ok, "<tokens>x y z</tokens>"), vec![ViolationCode::InvalidCharacterContent]);

    match compile_schema(schema("a b c").as_bytes()) {
        Err(Error::Compile(list)) => assert_eq!(list.codes(), vec![ViolationCode::InvalidDefaultOrFixed]),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("a three-item default must not compile"),
    }
}

#[test]
fn test_concurrent_use() {
    let schema = Arc::new(compile(
        r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="list">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="item" type="xs:int" maxOccurs="unbounded"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#,
    ));
    let doc = "<list><item>1</item><item>2</item><item>3</item></list>";

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let schema = Arc::clone(&schema);
            thread::spawn(move || {
                (0..25)
                    .filter(|_| schema.validate(doc.as_bytes(), &RuntimeOptions::default()).is_empty())
                    .count()
            })
        })
        .collect();
    let valid: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(valid, 200);
}
