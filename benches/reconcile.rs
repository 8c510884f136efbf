use crabtree::{DocumentRole, FilingDocuments, Parser, Reconciler};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::fmt::Write;
use std::path::Path;

fn synthetic_instance(concepts: usize) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<xbrli:xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance"
            xmlns:us-gaap="http://fasb.org/us-gaap/2020-01-31">
  <xbrli:context id="FY">
    <xbrli:entity><xbrli:identifier scheme="http://www.sec.gov/CIK">0000000000</xbrli:identifier></xbrli:entity>
    <xbrli:period><xbrli:startDate>2023-01-01</xbrli:startDate><xbrli:endDate>2023-12-31</xbrli:endDate></xbrli:period>
  </xbrli:context>
  <xbrli:context id="FY_us-gaap_SegmentAxis_us-gaap_NorthMember">
    <xbrli:entity><xbrli:identifier scheme="http://www.sec.gov/CIK">0000000000</xbrli:identifier></xbrli:entity>
    <xbrli:period><xbrli:startDate>2023-01-01</xbrli:startDate><xbrli:endDate>2023-12-31</xbrli:endDate></xbrli:period>
  </xbrli:context>
  <xbrli:unit id="usd"><xbrli:measure>iso4217:USD</xbrli:measure></xbrli:unit>
"#,
    );
    for i in 0..concepts {
        let _ = writeln!(
            xml,
            r#"  <us-gaap:Concept{i} contextRef="FY" unitRef="usd" decimals="-3">{v}</us-gaap:Concept{i}>
  <us-gaap:Concept{i} contextRef="FY_us-gaap_SegmentAxis_us-gaap_NorthMember" unitRef="usd" decimals="-3">{h}</us-gaap:Concept{i}>"#,
            i = i,
            v = i * 1000,
            h = i * 500
        );
    }
    xml.push_str("</xbrli:xbrl>");
    xml
}

fn synthetic_labels(concepts: usize) -> String {
    let mut xml = String::from(
        r#"<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase" xmlns:xlink="http://www.w3.org/1999/xlink">
  <link:labelLink xlink:type="extended" xlink:role="http://www.xbrl.org/2003/role/link">
"#,
    );
    for i in 0..concepts {
        let _ = writeln!(
            xml,
            r#"    <link:loc xlink:type="locator" xlink:href="us-gaap.xsd#us-gaap_Concept{i}" xlink:label="loc_{i}"/>
    <link:labelArc xlink:type="arc" xlink:from="loc_{i}" xlink:to="lab_{i}"/>
    <link:label xlink:type="resource" xlink:label="lab_{i}" xlink:role="http://www.xbrl.org/2003/role/label">Concept number {i}</link:label>"#,
            i = i
        );
    }
    xml.push_str("  </link:labelLink>\n</link:linkbase>");
    xml
}

fn synthetic_filing(concepts: usize) -> FilingDocuments {
    let parser = Parser::new();
    FilingDocuments::new("bench")
        .with_ticker_hint("bench")
        .with_document(
            DocumentRole::Instance,
            parser.parse_str(&synthetic_instance(concepts)).unwrap(),
        )
        .with_document(
            DocumentRole::Label,
            parser.parse_str(&synthetic_labels(concepts)).unwrap(),
        )
}

fn reconcile_synthetic(c: &mut Criterion) {
    let reconciler = Reconciler::new();
    let mut group = c.benchmark_group("reconcile");

    for concepts in [100, 1_000] {
        let filing = synthetic_filing(concepts);
        group.bench_with_input(BenchmarkId::from_parameter(concepts), &filing, |b, filing| {
            b.iter(|| reconciler.process(black_box(filing)));
        });
    }
    group.finish();
}

fn reconcile_sample_filing(c: &mut Criterion) {
    let sample = Path::new("fixtures/sample-filing");
    if !sample.is_dir() {
        return;
    }
    let filing = FilingDocuments::from_dir(sample).unwrap();
    let reconciler = Reconciler::new();
    c.bench_function("reconcile_sample_filing", |b| {
        b.iter(|| reconciler.process(black_box(&filing)));
    });
}

fn parse_instance(c: &mut Criterion) {
    let parser = Parser::new();
    let xml = synthetic_instance(1_000);
    c.bench_function("parse_instance_1000", |b| {
        b.iter(|| parser.parse_str(black_box(&xml)));
    });
}

criterion_group!(benches, reconcile_synthetic, reconcile_sample_filing, parse_instance);
criterion_main!(benches);
