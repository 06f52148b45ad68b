//! Instance validation behavior through the public API

use pretty_assertions::assert_eq;
use xsdstream::{compile_schema, RuntimeOptions, Schema, ViolationCode};

const XSI: &str = r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#;

fn schema(body: &str) -> Schema {
    let text = format!(r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">{}</xs:schema>"#, body);
    match compile_schema(text.as_bytes()) {
        Ok(schema) => schema,
        Err(e) => panic!("schema failed to compile: {}", e),
    }
}

fn codes(schema: &Schema, doc: &str) -> Vec<ViolationCode> {
    schema.validate(doc.as_bytes(), &RuntimeOptions::default()).codes()
}

// ============================================================================
// Content models
// ============================================================================

const PERSON: &str = r#"
  <xs:element name="person">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="name" type="xs:string"/>
        <xs:element name="age" type="xs:integer"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>"#;

#[test]
fn test_incomplete_content() {
    let schema = schema(PERSON);
    assert_eq!(
        codes(&schema, "<person><name>Jo</name></person>"),
        vec![ViolationCode::IncompleteContent]
    );
}

#[test]
fn test_text_in_element_only_content() {
    let schema = schema(PERSON);
    assert_eq!(
        codes(&schema, "<person>oops<name>Jo</name><age>3</age></person>"),
        vec![ViolationCode::InvalidCharacterContent]
    );
    assert_eq!(
        codes(&schema, "<person>\n  <name>Jo</name>\n  <age>3</age>\n</person>"),
        vec![]
    );
}

#[test]
fn test_undeclared_root() {
    let schema = schema(PERSON);
    assert_eq!(codes(&schema, "<animal><legs>4</legs></animal>"), vec![ViolationCode::UnexpectedElement]);
}

#[test]
fn test_mixed_content() {
    let schema = schema(
        r#"<xs:element name="para">
             <xs:complexType mixed="true">
               <xs:sequence>
                 <xs:element name="b" type="xs:string" minOccurs="0" maxOccurs="unbounded"/>
               </xs:sequence>
             </xs:complexType>
           </xs:element>"#,
    );
    assert_eq!(codes(&schema, "<para>Hello <b>world</b>!</para>"), vec![]);
    assert_eq!(codes(&schema, "<para>Hello <i>world</i></para>"), vec![ViolationCode::UnexpectedElement]);
}

#[test]
fn test_choice_and_all() {
    let schema = schema(
        r#"<xs:element name="pet">
             <xs:complexType>
               <xs:choice>
                 <xs:element name="cat" type="xs:string"/>
                 <xs:element name="dog" type="xs:string"/>
               </xs:choice>
             </xs:complexType>
           </xs:element>
           <xs:element name="point">
             <xs:complexType>
               <xs:all>
                 <xs:element name="x" type="xs:int"/>
                 <xs:element name="y" type="xs:int"/>
                 <xs:element name="label" type="xs:string" minOccurs="0"/>
               </xs:all>
             </xs:complexType>
           </xs:element>"#,
    );
    assert_eq!(codes(&schema, "<pet><dog>Rex</dog></pet>"), vec![]);
    assert_eq!(
        codes(&schema, "<pet><cat>Tom</cat><dog>Rex</dog></pet>"),
        vec![ViolationCode::UnexpectedElement]
    );
    assert_eq!(codes(&schema, "<point><y>2</y><x>1</x></point>"), vec![]);
    assert_eq!(
        codes(&schema, "<point><x>1</x><x>1</x><y>2</y></point>"),
        vec![ViolationCode::UnexpectedElement]
    );
    assert_eq!(codes(&schema, "<point><label>p</label><x>1</x></point>"), vec![ViolationCode::IncompleteContent]);
}

#[test]
fn test_substitution_group() {
    let schema = schema(
        r#"<xs:element name="shape" type="xs:string" abstract="true"/>
           <xs:element name="circle" type="xs:string" substitutionGroup="shape"/>
           <xs:element name="drawing">
             <xs:complexType>
               <xs:sequence>
                 <xs:element ref="shape" maxOccurs="unbounded"/>
               </xs:sequence>
             </xs:complexType>
           </xs:element>"#,
    );
    assert_eq!(codes(&schema, "<drawing><circle>c</circle><circle>d</circle></drawing>"), vec![]);
    assert_eq!(
        codes(&schema, "<drawing><shape>s</shape></drawing>"),
        vec![ViolationCode::UnexpectedElement, ViolationCode::IncompleteContent]
    );
}

// ============================================================================
// Wildcards
// ============================================================================

#[test]
fn test_skip_wildcard() {
    let schema = schema(
        r#"<xs:element name="envelope">
             <xs:complexType>
               <xs:sequence>
                 <xs:element name="header" type="xs:string"/>
                 <xs:any processContents="skip" minOccurs="0" maxOccurs="unbounded"/>
               </xs:sequence>
             </xs:complexType>
           </xs:element>"#,
    );
    assert_eq!(
        codes(
            &schema,
            r#"<envelope><header>h</header><payload x="1"><deep>text</deep></payload><other/></envelope>"#
        ),
        vec![]
    );
}

#[test]
fn test_lax_wildcard() {
    let schema = schema(
        r#"<xs:element name="count" type="xs:int"/>
           <xs:element name="bag">
             <xs:complexType>
               <xs:sequence>
                 <xs:any processContents="lax" maxOccurs="unbounded"/>
               </xs:sequence>
             </xs:complexType>
           </xs:element>"#,
    );
    assert_eq!(codes(&schema, "<bag><count>3</count><unknown>x</unknown></bag>"), vec![]);
    assert_eq!(
        codes(&schema, "<bag><count>three</count></bag>"),
        vec![ViolationCode::InvalidCharacterContent]
    );
}

#[test]
fn test_any_type_accepts_anything() {
    let schema = schema(r#"<xs:element name="blob"/>"#);
    assert_eq!(codes(&schema, r#"<blob a="1">text<x><y b="2"/></x>more</blob>"#), vec![]);
}

// ============================================================================
// Attributes
// ============================================================================

const ITEM: &str = r#"
  <xs:element name="item">
    <xs:complexType>
      <xs:attribute name="id" type="xs:int" use="required"/>
      <xs:attribute name="kind" type="xs:string" fixed="book"/>
      <xs:attribute name="lang" type="xs:language"/>
    </xs:complexType>
  </xs:element>"#;

#[test]
fn test_attribute_rules() {
    let schema = schema(ITEM);
    assert_eq!(codes(&schema, r#"<item id="1" kind="book" lang="en-GB"/>"#), vec![]);
    assert_eq!(codes(&schema, "<item/>"), vec![ViolationCode::MissingRequiredAttribute]);
    assert_eq!(codes(&schema, r#"<item id="x"/>"#), vec![ViolationCode::InvalidAttributeValue]);
    assert_eq!(codes(&schema, r#"<item id="1" kind="dvd"/>"#), vec![ViolationCode::InvalidAttributeValue]);
    assert_eq!(codes(&schema, r#"<item id="1" color="red"/>"#), vec![ViolationCode::UnexpectedAttribute]);
    assert_eq!(
        codes(&schema, &format!(r#"<item {} id="1" xsi:color="red"/>"#, XSI)),
        vec![ViolationCode::UnexpectedAttribute]
    );
}

#[test]
fn test_text_in_empty_content() {
    let schema = schema(ITEM);
    assert_eq!(codes(&schema, r#"<item id="1">text</item>"#), vec![ViolationCode::InvalidCharacterContent]);
}

// ============================================================================
// Simple values
// ============================================================================

#[test]
fn test_facets_and_unions() {
    let schema = schema(
        r#"<xs:simpleType name="code">
             <xs:restriction base="xs:string">
               <xs:pattern value="[A-Z]{3}-\d+"/>
             </xs:restriction>
           </xs:simpleType>
           <xs:simpleType name="size">
             <xs:union memberTypes="xs:int">
               <xs:simpleType>
                 <xs:restriction base="xs:string">
                   <xs:enumeration value="small"/>
                   <xs:enumeration value="large"/>
                 </xs:restriction>
               </xs:simpleType>
             </xs:union>
           </xs:simpleType>
           <xs:element name="code" type="code"/>
           <xs:element name="size" type="size"/>
           <xs:element name="day" type="xs:date"/>"#,
    );
    assert_eq!(codes(&schema, "<code>ABC-12</code>"), vec![]);
    assert_eq!(codes(&schema, "<code>abc</code>"), vec![ViolationCode::InvalidCharacterContent]);
    assert_eq!(codes(&schema, "<size>12</size>"), vec![]);
    assert_eq!(codes(&schema, "<size>small</size>"), vec![]);
    assert_eq!(codes(&schema, "<size>medium</size>"), vec![ViolationCode::InvalidCharacterContent]);
    assert_eq!(codes(&schema, "<day>2024-02-29</day>"), vec![]);
    assert_eq!(codes(&schema, "<day>2023-02-29</day>"), vec![ViolationCode::InvalidCharacterContent]);
}

#[test]
fn test_fixed_element_value() {
    let schema = schema(r#"<xs:element name="version" type="xs:decimal" fixed="1.0"/>"#);
    assert_eq!(codes(&schema, "<version>1.00</version>"), vec![]);
    assert_eq!(codes(&schema, "<version/>"), vec![]);
    assert_eq!(codes(&schema, "<version>2</version>"), vec![ViolationCode::InvalidCharacterContent]);
}

#[test]
fn test_long_decimals_keep_precision() {
    let schema = schema(
        r#"<xs:element name="list">
             <xs:complexType>
               <xs:sequence>
                 <xs:element name="i" minOccurs="0" maxOccurs="unbounded">
                   <xs:complexType><xs:attribute name="v" type="xs:decimal"/></xs:complexType>
                 </xs:element>
                 <xs:element name="n" type="xs:nonNegativeInteger" minOccurs="0"/>
               </xs:sequence>
             </xs:complexType>
             <xs:unique name="valueUnique">
               <xs:selector xpath="i"/>
               <xs:field xpath="@v"/>
             </xs:unique>
           </xs:element>"#,
    );
    let distinct = r#"<list><i v="0.1234567890123456789012345678901"/><i v="0.1234567890123456789012345678902"/></list>"#;
    assert_eq!(codes(&schema, distinct), vec![]);
    let same = r#"<list><i v="0.12345678901234567890123456789010"/><i v="0.1234567890123456789012345678901"/></list>"#;
    assert_eq!(codes(&schema, same), vec![ViolationCode::DuplicateKey]);
    assert_eq!(codes(&schema, "<list><n>123456789012345678901234567890</n></list>"), vec![]);
}

// ============================================================================
// xsi:type and xsi:nil
// ============================================================================

const TYPED: &str = r#"
  <xs:complexType name="base">
    <xs:sequence><xs:element name="a" type="xs:string"/></xs:sequence>
  </xs:complexType>
  <xs:complexType name="ext">
    <xs:complexContent>
      <xs:extension base="base">
        <xs:sequence><xs:element name="b" type="xs:string"/></xs:sequence>
      </xs:extension>
    </xs:complexContent>
  </xs:complexType>
  <xs:element name="open" type="base"/>
  <xs:element name="locked" type="base" block="extension"/>
  <xs:element name="n" type="xs:int" nillable="true"/>
  <xs:element name="m" type="xs:int"/>"#;

#[test]
fn test_xsi_type() {
    let schema = schema(TYPED);
    assert_eq!(codes(&schema, &format!(r#"<open {} xsi:type="ext"><a/><b/></open>"#, XSI)), vec![]);
    assert_eq!(
        codes(&schema, &format!(r#"<open {} xsi:type="missing"><a/></open>"#, XSI)),
        vec![ViolationCode::XsiTypeInvalid]
    );
    assert_eq!(
        codes(&schema, &format!(r#"<locked {} xsi:type="ext"><a/><b/></locked>"#, XSI)),
        vec![ViolationCode::XsiTypeInvalid, ViolationCode::UnexpectedElement]
    );
}

#[test]
fn test_xsi_nil() {
    let schema = schema(TYPED);
    assert_eq!(codes(&schema, &format!(r#"<n {} xsi:nil="true"/>"#, XSI)), vec![]);
    assert_eq!(
        codes(&schema, &format!(r#"<n {} xsi:nil="true">5</n>"#, XSI)),
        vec![ViolationCode::NilledWithContent]
    );
    let list = codes(&schema, &format!(r#"<m {} xsi:nil="true"/>"#, XSI));
    assert_eq!(list.first(), Some(&ViolationCode::ElementNotNillable));
}

// ============================================================================
// IDs
// ============================================================================

#[test]
fn test_id_and_idref() {
    let schema = schema(
        r#"<xs:element name="doc">
             <xs:complexType>
               <xs:sequence>
                 <xs:element name="node" maxOccurs="unbounded">
                   <xs:complexType>
                     <xs:attribute name="id" type="xs:ID"/>
                     <xs:attribute name="ref" type="xs:IDREF"/>
                   </xs:complexType>
                 </xs:element>
               </xs:sequence>
             </xs:complexType>
           </xs:element>"#,
    );
    assert_eq!(codes(&schema, r#"<doc><node ref="b"/><node id="b"/></doc>"#), vec![]);
    assert_eq!(
        codes(&schema, r#"<doc><node id="a"/><node id="a"/><node ref="zz"/></doc>"#),
        vec![ViolationCode::DuplicateId, ViolationCode::UnresolvedIdRef]
    );
}

// ============================================================================
// Namespaces
// ============================================================================

#[test]
fn test_qualified_elements() {
    let text = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
        targetNamespace="urn:books" xmlns="urn:books" elementFormDefault="qualified">
  <xs:element name="book">
    <xs:complexType>
      <xs:sequence><xs:element name="title" type="xs:string"/></xs:sequence>
      <xs:attribute name="isbn" type="xs:string"/>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;
    let schema = compile_schema(text.as_bytes()).unwrap();
    assert_eq!(
        codes(&schema, r#"<b:book xmlns:b="urn:books" isbn="1"><b:title>T</b:title></b:book>"#),
        vec![]
    );
    assert_eq!(
        codes(&schema, r#"<book xmlns="urn:books"><title xmlns="">T</title></book>"#),
        vec![ViolationCode::UnexpectedElement, ViolationCode::IncompleteContent]
    );
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_malformed_input_is_fatal() {
    let schema = schema(PERSON);
    assert_eq!(codes(&schema, "<person><name>Jo</person>"), vec![ViolationCode::XmlParse]);
    assert_eq!(codes(&schema, ""), vec![ViolationCode::XmlParse]);
}

#[test]
fn test_depth_limit_is_fatal() {
    let schema = schema(r#"<xs:element name="a"/>"#);
    let options = RuntimeOptions::new().with_instance_max_depth(2);
    let list = schema.validate("<a><b><c/></b></a>".as_bytes(), &options);
    assert_eq!(list.codes(), vec![ViolationCode::LimitExceeded]);
}

#[test]
fn test_violation_limit() {
    let schema = schema(ITEM);
    let options = RuntimeOptions::new().with_max_violations(2);
    let list = schema.validate(r#"<item id="1" a="1" b="2" c="3"/>"#.as_bytes(), &options);
    assert_eq!(list.len(), 2);
    assert!(list.truncated());
}

#[test]
fn test_violation_report() {
    let schema = schema(PERSON);
    let list = schema.validate("<person>\n  <age>30</age>\n</person>".as_bytes(), &RuntimeOptions::default());
    let first = list.iter().next().unwrap();
    assert_eq!(first.line, 2);
    assert_eq!(first.column, 3);
    assert_eq!(first.path.as_deref(), Some("/person/age"));
    assert!(first.to_string().starts_with("2:3: [UnexpectedElement]"));

    let json: serde_json::Value = serde_json::from_str(&list.to_json()).unwrap();
    assert_eq!(json[0]["code"], "UnexpectedElement");
    assert_eq!(json[0]["path"], "/person/age");
}

#[test]
fn test_repeated_validation_is_stable() {
    let schema = schema(PERSON);
    let doc = "<person><name>Jo</name><age>30</age></person>";
    for _ in 0..100 {
        assert!(schema.validate(doc.as_bytes(), &RuntimeOptions::default()).is_empty());
    }
}
