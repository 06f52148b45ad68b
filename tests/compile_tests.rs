//! Schema compilation errors and limits

use pretty_assertions::assert_eq;
use xsdstream::{compile_schema, compile_schema_with, Error, Options, RuntimeOptions, ViolationCode, ViolationList};

fn wrap(body: &str) -> String {
    format!(r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">{}</xs:schema>"#, body)
}

fn compile_errors_with(body: &str, options: Options) -> ViolationList {
    match compile_schema_with(wrap(body).as_bytes(), options) {
        Err(Error::Compile(list)) => list,
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("schema compiled but errors were expected"),
    }
}

fn compile_errors(body: &str) -> ViolationList {
    compile_errors_with(body, Options::default())
}

#[test]
fn test_clean_schema_compiles_repeatably() {
    let body = r#"<xs:complexType name="t">
                    <xs:sequence><xs:element name="a" type="xs:string" maxOccurs="3"/></xs:sequence>
                  </xs:complexType>
                  <xs:element name="root" type="t"/>
                  <xs:element name="other" type="xs:int"/>"#;
    let first = compile_schema(wrap(body).as_bytes()).unwrap();
    let second = compile_schema(wrap(body).as_bytes()).unwrap();
    let names = |s: &xsdstream::Schema| s.components().element_names.keys().cloned().collect::<Vec<_>>();
    assert_eq!(names(&first), names(&second));
    assert_eq!(first.compiled().state_count(), second.compiled().state_count());
}

#[test]
fn test_malformed_schema() {
    match compile_schema("<xs:schema xmlns:xs=\"http://www.w3.org/2001/XMLSchema\">".as_bytes()) {
        Err(Error::Compile(list)) => assert_eq!(list.codes(), vec![ViolationCode::SchemaParse]),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_unresolved_references() {
    let list = compile_errors(
        r#"<xs:element name="a" type="noSuchType"/>
           <xs:element name="b">
             <xs:complexType>
               <xs:sequence><xs:element ref="noSuchElement"/></xs:sequence>
             </xs:complexType>
           </xs:element>"#,
    );
    assert_eq!(list.count_code(ViolationCode::ReferenceNotFound), 2);
}

#[test]
fn test_duplicate_global() {
    let list = compile_errors(
        r#"<xs:element name="a" type="xs:string"/>
           <xs:element name="a" type="xs:int"/>"#,
    );
    assert!(list.has_code(ViolationCode::DuplicateGlobal));
}

#[test]
fn test_cyclic_derivation() {
    let list = compile_errors(
        r#"<xs:simpleType name="a"><xs:restriction base="b"/></xs:simpleType>
           <xs:simpleType name="b"><xs:restriction base="a"/></xs:simpleType>"#,
    );
    assert!(list.has_code(ViolationCode::CyclicDerivation));
}

#[test]
fn test_ambiguous_content_model() {
    let list = compile_errors(
        r#"<xs:element name="root">
             <xs:complexType>
               <xs:sequence>
                 <xs:element name="a" type="xs:string" minOccurs="0"/>
                 <xs:element name="a" type="xs:string"/>
               </xs:sequence>
             </xs:complexType>
           </xs:element>"#,
    );
    assert_eq!(list.codes(), vec![ViolationCode::AmbiguousContentModel]);
}

#[test]
fn test_all_group_restrictions() {
    let list = compile_errors(
        r#"<xs:element name="root">
             <xs:complexType>
               <xs:all>
                 <xs:element name="a" type="xs:string" maxOccurs="2"/>
               </xs:all>
             </xs:complexType>
           </xs:element>"#,
    );
    assert_eq!(list.codes(), vec![ViolationCode::AllGroupTooComplex]);
}

#[test]
fn test_dfa_state_limit() {
    let body = r#"<xs:element name="root">
                    <xs:complexType>
                      <xs:sequence><xs:element name="a" type="xs:string" maxOccurs="50"/></xs:sequence>
                    </xs:complexType>
                  </xs:element>"#;
    let options = Options::new().with_runtime(RuntimeOptions::new().with_max_dfa_states(10));
    let list = compile_errors_with(body, options);
    assert_eq!(list.codes(), vec![ViolationCode::DfaStateExplosion]);

    let options = Options::new().with_runtime(RuntimeOptions::new().with_max_occurs_limit(10));
    let list = compile_errors_with(body, options);
    assert_eq!(list.codes(), vec![ViolationCode::LimitExceeded]);

    assert!(compile_schema(wrap(body).as_bytes()).is_ok());
}

#[test]
fn test_unbounded_repetition_stays_small() {
    let schema = compile_schema(
        wrap(
            r#"<xs:element name="root">
                 <xs:complexType>
                   <xs:sequence><xs:element name="a" type="xs:string" maxOccurs="unbounded"/></xs:sequence>
                 </xs:complexType>
               </xs:element>"#,
        )
        .as_bytes(),
    )
    .unwrap();
    assert_eq!(schema.compiled().state_count(), 2);
}

#[test]
fn test_restriction_must_narrow_content() {
    let list = compile_errors(
        r#"<xs:complexType name="base">
             <xs:sequence>
               <xs:element name="a" type="xs:string"/>
               <xs:element name="b" type="xs:string" minOccurs="0"/>
             </xs:sequence>
           </xs:complexType>
           <xs:complexType name="wider">
             <xs:complexContent>
               <xs:restriction base="base">
                 <xs:sequence>
                   <xs:element name="a" type="xs:string"/>
                   <xs:element name="c" type="xs:string"/>
                 </xs:sequence>
               </xs:restriction>
             </xs:complexContent>
           </xs:complexType>"#,
    );
    assert!(list.has_code(ViolationCode::InvalidDerivation), "{}", list);

    let ok = wrap(
        r#"<xs:complexType name="base">
             <xs:sequence>
               <xs:element name="a" type="xs:string"/>
               <xs:element name="b" type="xs:string" minOccurs="0"/>
             </xs:sequence>
           </xs:complexType>
           <xs:complexType name="narrow">
             <xs:complexContent>
               <xs:restriction base="base">
                 <xs:sequence><xs:element name="a" type="xs:string"/></xs:sequence>
               </xs:restriction>
             </xs:complexContent>
           </xs:complexType>"#,
    );
    assert!(compile_schema(ok.as_bytes()).is_ok());
}

#[test]
fn test_identity_constraint_shape() {
    let list = compile_errors(
        r#"<xs:element name="root">
             <xs:complexType>
               <xs:sequence>
                 <xs:element name="item" maxOccurs="unbounded">
                   <xs:complexType>
                     <xs:attribute name="a" type="xs:string"/>
                     <xs:attribute name="b" type="xs:string"/>
                   </xs:complexType>
                 </xs:element>
               </xs:sequence>
             </xs:complexType>
             <xs:key name="pair">
               <xs:selector xpath="item"/>
               <xs:field xpath="@a"/>
               <xs:field xpath="@b"/>
             </xs:key>
             <xs:keyref name="single" refer="pair">
               <xs:selector xpath="item"/>
               <xs:field xpath="@a"/>
             </xs:keyref>
           </xs:element>"#,
    );
    assert_eq!(list.codes(), vec![ViolationCode::IdentityConstraintMalformed]);
}

#[test]
fn test_final_blocks_derivation() {
    let list = compile_errors(
        r#"<xs:simpleType name="sealed" final="restriction">
             <xs:restriction base="xs:string"/>
           </xs:simpleType>
           <xs:simpleType name="derived">
             <xs:restriction base="sealed"/>
           </xs:simpleType>"#,
    );
    assert_eq!(list.codes(), vec![ViolationCode::FinalBlocksDerivation]);
}

#[test]
fn test_errors_are_ordered_by_phase() {
    let list = compile_errors(
        r#"<xs:element name="a" type="missing"/>
           <xs:simpleType name="bad">
             <xs:restriction base="xs:int"><xs:minLength value="1"/></xs:restriction>
           </xs:simpleType>"#,
    );
    let codes = list.codes();
    let reference = codes.iter().position(|c| *c == ViolationCode::ReferenceNotFound).unwrap();
    let facet = codes.iter().position(|c| *c == ViolationCode::InvalidFacet).unwrap();
    assert!(reference < facet);
}

#[test]
fn test_errors_follow_name_order() {
    let list = compile_errors(
        r#"<xs:simpleType name="zeta"><xs:restriction base="missingZ"/></xs:simpleType>
           <xs:element name="omega" type="missingO"/>
           <xs:simpleType name="alpha"><xs:restriction base="missingA"/></xs:simpleType>
           <xs:element name="beta" type="missingB"/>"#,
    );
    let missing: Vec<&str> = list
        .iter()
        .filter(|v| v.code == ViolationCode::ReferenceNotFound)
        .map(|v| v.message.as_str())
        .collect();
    assert_eq!(
        missing,
        vec![
            "type 'missingA' not found",
            "type 'missingZ' not found",
            "type 'missingB' not found",
            "type 'missingO' not found",
        ]
    );
}
