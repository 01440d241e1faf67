//! End-to-end mapping tests: profile resolution against realistic
//! annotation documents, three-way tagging, failure isolation, and the flat
//! projection.

use std::collections::BTreeSet;

use chrono::Utc;
use nodulyx_common::{ScalarValue, TaggedValue, XmlDocument};
use nodulyx_mapping::{
    flatten, MappingProfile, ProfileMappingEngine, ProfileSpec, ResolveContext,
};

const V2_DOC: &str = r#"<LidcReadMessage xmlns="http://www.nih.gov">
  <ResponseHeader>
    <Version>1.8.1</Version>
    <StudyInstanceUID>1.3.6.1.4.1.14519.5.2.1.6279</StudyInstanceUID>
    <SeriesInstanceUID>1.3.6.1.4.1.14519.5.2.1.6280</SeriesInstanceUID>
    <Modality>CT</Modality>
  </ResponseHeader>
  <readingSession>
    <annotationVersion>3.12</annotationVersion>
    <unblindedReadNodule>
      <noduleID>Nodule 001</noduleID>
      <characteristics>
        <subtlety>5</subtlety>
        <internalStructure>1</internalStructure>
        <calcification>6</calcification>
        <margin>4</margin>
        <malignancy>3</malignancy>
      </characteristics>
      <roi>
        <imageZposition>-125.75</imageZposition>
        <imageSOP_UID>1.3.6.1.4.1.14519.5.2.1.9999</imageSOP_UID>
        <inclusion>TRUE</inclusion>
        <edgeMap><xCoord>312</xCoord><yCoord>198</yCoord></edgeMap>
        <edgeMap><xCoord>313</xCoord><yCoord>199</yCoord></edgeMap>
        <edgeMap><xCoord>314</xCoord><yCoord>200</yCoord></edgeMap>
      </roi>
      <roi>
        <imageZposition>-128.25</imageZposition>
        <imageSOP_UID>1.3.6.1.4.1.14519.5.2.1.9998</imageSOP_UID>
        <inclusion>FALSE</inclusion>
        <edgeMap><xCoord>310</xCoord><yCoord>197</yCoord></edgeMap>
      </roi>
    </unblindedReadNodule>
    <unblindedReadNodule>
      <noduleID>Nodule 002</noduleID>
      <characteristics>
        <subtlety>2</subtlety>
      </characteristics>
    </unblindedReadNodule>
  </readingSession>
  <readingSession>
    <annotationVersion>3.12</annotationVersion>
    <unblindedReadNodule>
      <noduleID>Nodule 003</noduleID>
      <roi>
        <imageZposition>not-a-number</imageZposition>
        <edgeMap><xCoord>10</xCoord><yCoord>20</yCoord></edgeMap>
      </roi>
      <roi>
        <imageZposition>-130.00</imageZposition>
        <edgeMap><xCoord>11</xCoord><yCoord>21</yCoord></edgeMap>
      </roi>
    </unblindedReadNodule>
  </readingSession>
</LidcReadMessage>"#;

fn resolve_v2() -> nodulyx_mapping::CanonicalDocument {
    let doc = XmlDocument::parse_str(V2_DOC).unwrap();
    let engine = ProfileMappingEngine::new();
    let ctx = ResolveContext::new("doc-v2", "V2_Format");
    engine
        .resolve(&MappingProfile::generic(), &doc, &ctx)
        .unwrap()
}

#[test]
fn test_header_fields_resolved() {
    let out = resolve_v2();
    assert_eq!(
        out.scalar_fields.get("header.modality"),
        Some(&TaggedValue::Present(ScalarValue::Text("CT".to_string())))
    );
    assert_eq!(
        out.scalar_fields.get("header.study_instance_uid"),
        Some(&TaggedValue::Present(ScalarValue::Text(
            "1.3.6.1.4.1.14519.5.2.1.6279".to_string()
        )))
    );
}

#[test]
fn test_sessions_are_positional() {
    let out = resolve_v2();
    assert_eq!(out.sessions.len(), 2);
    assert_eq!(out.sessions[0].anonymized_reader_id, 1);
    assert_eq!(out.sessions[1].anonymized_reader_id, 2);
    assert_eq!(out.sessions[0].read_count, 2);
    assert_eq!(out.sessions[0].annotation_version.as_deref(), Some("3.12"));
}

#[test]
fn test_nodules_and_rois_extracted() {
    let out = resolve_v2();
    assert_eq!(out.nodules.len(), 3);

    let n1 = &out.nodules[0];
    assert_eq!(n1.nodule_id.as_deref(), Some("Nodule 001"));
    assert_eq!(n1.rois.len(), 2);
    // First edge point becomes the primary coordinate; total count kept.
    assert_eq!(n1.rois[0].primary_coord, Some((312.0, 198.0)));
    assert_eq!(n1.rois[0].edge_point_count, 3);
    assert_eq!(n1.rois[0].inclusion, Some(true));
    assert_eq!(n1.rois[1].inclusion, Some(false));
    assert_eq!(
        n1.characteristics.get("malignancy"),
        Some(&TaggedValue::Present(ScalarValue::Int(3)))
    );
}

#[test]
fn test_roi_failure_is_isolated_to_the_entity() {
    let out = resolve_v2();
    let n3 = &out.nodules[2];
    // The bad-z ROI failed; its sibling survived and the failure is a note.
    assert_eq!(n3.rois.len(), 1);
    assert_eq!(n3.rois[0].z_position, Some(-130.0));
    assert_eq!(n3.quality_notes.len(), 1);
    assert!(n3.quality_notes[0].contains("roi 0"));
}

#[test]
fn test_expected_but_missing_vs_not_applicable() {
    let doc = XmlDocument::parse_str(V2_DOC).unwrap();
    let engine = ProfileMappingEngine::new();
    let expected: BTreeSet<String> =
        ["subtlety", "malignancy", "margin"].iter().map(|s| s.to_string()).collect();
    let ctx = ResolveContext::new("doc-v2", "V2_Format").with_expected_fields(expected);
    let out = engine
        .resolve(&MappingProfile::generic(), &doc, &ctx)
        .unwrap();

    // Nodule 002 carries only subtlety.
    let n2 = &out.nodules[1];
    assert_eq!(
        n2.characteristics.get("subtlety"),
        Some(&TaggedValue::Present(ScalarValue::Int(2)))
    );
    // Expected by the case, absent from the source.
    assert_eq!(
        n2.characteristics.get("malignancy"),
        Some(&TaggedValue::ExpectedButMissing)
    );
    // Absent and not expected.
    assert_eq!(
        n2.characteristics.get("calcification"),
        Some(&TaggedValue::NotApplicable)
    );
}

#[test]
fn test_coercion_failure_degrades_to_default_then_invalid() {
    let raw = r#"
        id = "strict"

        [[field_mappings]]
        source_path = "ResponseHeader/Version"
        target_path = "header.version_num"
        data_type = "integer"
        default_value = "0"

        [[field_mappings]]
        source_path = "ResponseHeader/Modality"
        target_path = "header.modality_num"
        data_type = "integer"
    "#;
    let profile = MappingProfile::compile(ProfileSpec::from_toml_str(raw).unwrap()).unwrap();
    let doc = XmlDocument::parse_str(V2_DOC).unwrap();
    let out = ProfileMappingEngine::new()
        .resolve(&profile, &doc, &ResolveContext::new("doc-v2", "V2_Format"))
        .unwrap();

    // "1.8.1" is not an integer: the default steps in.
    assert_eq!(
        out.scalar_fields.get("header.version_num"),
        Some(&TaggedValue::Present(ScalarValue::Int(0)))
    );
    // "CT" is not an integer and there is no default: raw text is kept.
    assert_eq!(
        out.scalar_fields.get("header.modality_num"),
        Some(&TaggedValue::Invalid("CT".to_string()))
    );
}

#[test]
fn test_array_bound_mapping_emits_one_value_per_match() {
    let raw = r#"
        id = "per_nodule"

        [[field_mappings]]
        source_path = "readingSession[]/unblindedReadNodule[]/characteristics/subtlety"
        target_path = "nodule.characteristics.subtlety_mapped"
        data_type = "integer"
    "#;
    let profile = MappingProfile::compile(ProfileSpec::from_toml_str(raw).unwrap()).unwrap();
    let doc = XmlDocument::parse_str(V2_DOC).unwrap();
    let out = ProfileMappingEngine::new()
        .resolve(&profile, &doc, &ResolveContext::new("doc-v2", "V2_Format"))
        .unwrap();

    assert_eq!(
        out.nodules[0].characteristics.get("subtlety_mapped"),
        Some(&TaggedValue::Present(ScalarValue::Int(5)))
    );
    assert_eq!(
        out.nodules[1].characteristics.get("subtlety_mapped"),
        Some(&TaggedValue::Present(ScalarValue::Int(2)))
    );
}

#[test]
fn test_roi_target_mapping_attaches_to_each_roi() {
    let raw = r#"
        id = "per_roi"

        [[field_mappings]]
        source_path = "readingSession[]/unblindedReadNodule[]/roi[]/imageZposition"
        target_path = "roi.z_mapped"
        data_type = "float"
    "#;
    let profile = MappingProfile::compile(ProfileSpec::from_toml_str(raw).unwrap()).unwrap();
    let doc = XmlDocument::parse_str(V2_DOC).unwrap();
    let out = ProfileMappingEngine::new()
        .resolve(&profile, &doc, &ResolveContext::new("doc-v2", "V2_Format"))
        .unwrap();

    // Each ROI keeps the value matched in its own iteration context; the
    // second never overwrites the first.
    let rois = &out.nodules[0].rois;
    assert_eq!(
        rois[0].values.get("z_mapped"),
        Some(&TaggedValue::Present(ScalarValue::Float(-125.75)))
    );
    assert_eq!(
        rois[1].values.get("z_mapped"),
        Some(&TaggedValue::Present(ScalarValue::Float(-128.25)))
    );
    // Nodule 003's first ROI was dropped during extraction; the surviving
    // sibling is still addressed by its document-order index.
    let n3 = &out.nodules[2];
    assert_eq!(n3.rois[0].index, 1);
    assert_eq!(
        n3.rois[0].values.get("z_mapped"),
        Some(&TaggedValue::Present(ScalarValue::Float(-130.0)))
    );
    // Per-ROI values survive into the flat projection.
    let rows = flatten(&out);
    assert!(rows
        .iter()
        .any(|r| r.roi_values.get("z_mapped")
            == Some(&TaggedValue::Present(ScalarValue::Float(-128.25)))));
}

#[test]
fn test_resolution_is_idempotent() {
    let doc = XmlDocument::parse_str(V2_DOC).unwrap();
    let engine = ProfileMappingEngine::new();
    let profile = MappingProfile::generic();
    let mut ctx = ResolveContext::new("doc-v2", "V2_Format");
    ctx.timestamp = Some(Utc::now());

    let a = engine.resolve(&profile, &doc, &ctx).unwrap();
    let b = engine
        .resolve(&profile, &XmlDocument::parse_str(V2_DOC).unwrap(), &ctx)
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_flatten_row_count_from_resolved_document() {
    let out = resolve_v2();
    // ROIs per nodule: [2, 0, 1] -> 2 + 1 + 1 = 4 rows.
    let rows = flatten(&out);
    assert_eq!(rows.len(), 4);
    let missing: Vec<_> = rows.iter().filter(|r| r.roi_missing).collect();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].nodule_id.as_deref(), Some("Nodule 002"));
    // Flattening is reproducible bit-for-bit.
    assert_eq!(rows, flatten(&out));
}
