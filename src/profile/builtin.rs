use anyhow::Result;

use super::types::SiteProfile;

const BUILTIN: &[(&str, &str)] = &[
    ("lancaster-parcel", include_str!("../../profiles/lancaster-parcel.json")),
    ("sunbiz-document", include_str!("../../profiles/sunbiz-document.json")),
    ("pga-member", include_str!("../../profiles/pga-member.json")),
];

pub fn names() -> Vec<&'static str> {
    BUILTIN.iter().map(|(n, _)| *n).collect()
}

pub fn get(name: &str) -> Option<Result<SiteProfile>> {
    BUILTIN
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, raw)| SiteProfile::from_json(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_loads_under_its_own_name() {
        for name in names() {
            let p = get(name).unwrap().unwrap();
            assert_eq!(p.name, name);
        }
    }

    fn extract(name: &str, html: &str) -> crate::profile::rules::Extraction {
        let profile = get(name).unwrap().unwrap();
        crate::profile::Extractor::compile(&profile).unwrap().extract(html)
    }

    const PARCEL_PAGE: &str = r#"
        <html><body>
        <div class="panel"><div class="panel-heading">Overview</div>
          <div class="panel-body" id="overview-body">
            <div class="row"><div class="col-sm-5">Parcel</div><div class="col-sm-7">3400123400000</div></div>
          </div>
        </div>
        <div style="border-top: 1px solid #ccc">
          <div class="row"><div class="col-sm-4 inner-label">Parcel Owner</div><div class="col-sm-8">SMITH JOHN</div></div>
          <div class="row"><div class="col-sm-4 inner-label"></div><div class="col-sm-8">123 MAIN ST</div></div>
          <div class="row"><div class="col-sm-4 inner-label"></div><div class="col-sm-8">LANCASTER PA 17601</div></div>
        </div>
        DELINQUENT
        </body></html>
    "#;

    const DELINQUENT_PANEL: &str = r#"
        <div class="panel">
          <div class="panel-heading">Delinquent Taxes</div>
          <div class="panel-body">Payments must be certified funds</div>
          <table>
            <tr><th>Tax Year</th><th>Amount</th><th>Interest</th><th>Total Due</th></tr>
            <tr><td>2021</td><td>2,310.40</td><td>184.83</td><td>2,495.23</td></tr>
            <tr><td>2023</td><td>1,150.00</td><td>11.50</td><td>1,161.50</td></tr>
          </table>
        </div>
    "#;

    #[test]
    fn lancaster_owner_row_is_not_part_of_the_address() {
        let got = extract("lancaster-parcel", &PARCEL_PAGE.replace("DELINQUENT", ""));
        assert!(got.ready);
        assert_eq!(got.fields["Parcel Number"], "3400123400000");
        assert_eq!(got.fields["Owner Name"], "SMITH JOHN");
        assert_eq!(got.fields["Property Address"], "123 MAIN ST, LANCASTER PA 17601");
        assert_eq!(got.fields["Tax Year"], "N/A");
        assert_eq!(got.fields["Delinquent Tax Amount"], "0.00");
        assert!(got.missing_required.is_empty());
    }

    #[test]
    fn lancaster_reads_the_delinquent_taxes_panel() {
        let got = extract("lancaster-parcel", &PARCEL_PAGE.replace("DELINQUENT", DELINQUENT_PANEL));
        assert_eq!(got.fields["Tax Year"], "2021; 2023");
        assert_eq!(got.fields["Delinquent Tax Amount"], "2,310.40; 1,150.00");
        let columns = get("lancaster-parcel").unwrap().unwrap().field_names();
        assert_eq!(columns, vec!["Parcel Number", "Tax Year", "Delinquent Tax Amount", "Owner Name", "Property Address"]);
    }

    #[test]
    fn sunbiz_reads_principal_address_and_two_officers() {
        let page = r#"
            <html><body>
            <div class="detailSection corporationName"><p>Florida Profit Corporation</p><p>ACME WIDGETS, INC.</p></div>
            <div class="detailSection filingInformation"><span><div>
              <label>Document Number</label><span>P12000012345</span>
              <label>Status</label><span>ACTIVE</span>
            </div></span></div>
            <div class="detailSection">
              <span>Principal Address</span>
              <span><div>4000 NW 1ST AVE<br/>MIAMI, FL 33127<br/></div><span>Changed: 04/27/2015</span></span>
            </div>
            <div class="detailSection">
              <span>Registered Agent Name &amp; Address</span><span>DOE, JANE</span>
            </div>
            <div class="detailSection">
              <span>Officer/Director Detail</span><span>Name &amp; Address</span><br/><br/>
              <span>Title PD</span><br/><br/>
              ROE, RICHARD<br/>
              <span><div>1 A ST<br/>MIAMI, FL 33127</div></span><br/><br/>
              <span>Title VP</span><br/><br/>
              ROE, ROBERTA<br/>
              <span><div>1 A ST<br/>MIAMI, FL 33127</div></span>
            </div>
            </body></html>
        "#;
        let got = extract("sunbiz-document", page);
        assert!(got.ready);
        assert_eq!(got.fields["Corporation Name"], "Florida Profit Corporation ACME WIDGETS, INC.");
        assert_eq!(got.fields["Principal Address"], "4000 NW 1ST AVE, MIAMI, FL 33127");
        assert_eq!(got.fields["Registered Agent Name"], "DOE, JANE");
        assert_eq!(got.fields["1st Officer Title"], "Title PD");
        assert_eq!(got.fields["1st Officer Name"], "ROE, RICHARD");
        assert_eq!(got.fields["2nd Officer Title"], "Title VP");
        assert_eq!(got.fields["2nd Officer Name"], "ROE, ROBERTA");
        assert_eq!(got.fields["Status"], "ACTIVE");
    }

    #[test]
    fn unknown_name_is_none() {
        assert!(get("no-such-site").is_none());
    }
}
