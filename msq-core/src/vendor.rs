//! Vendor registration form: country-dependent tax field and validation.

use crate::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9\s\-()]{7,20}$").expect("valid phone regex"));
static GST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{2}[A-Z]{5}[0-9]{4}[A-Z][1-9A-Z]Z[0-9A-Z]$").expect("valid GST regex")
});
static TRN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{15}$").expect("valid TRN regex"));
static SA_VAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^3[0-9]{13}3$").expect("valid VAT regex"));

/// Tax registration scheme implied by a vendor's country.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxScheme {
    IndiaGst,
    UaeTrn,
    SaudiVat,
    Generic,
}

/// Label and placeholder shown for the tax number input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxField {
    pub scheme: TaxScheme,
    pub label: &'static str,
    pub placeholder: &'static str,
}

impl TaxField {
    /// Checks the format of a non-empty tax number for this scheme.
    pub fn accepts(&self, value: &str) -> bool {
        let value = value.trim();
        match self.scheme {
            TaxScheme::IndiaGst => GST_RE.is_match(&value.to_ascii_uppercase()),
            TaxScheme::UaeTrn => TRN_RE.is_match(value),
            TaxScheme::SaudiVat => SA_VAT_RE.is_match(value),
            TaxScheme::Generic => !value.is_empty(),
        }
    }
}

pub fn tax_field_for_country(country: &str) -> TaxField {
    let normalized = country.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "india" | "in" => TaxField {
            scheme: TaxScheme::IndiaGst,
            label: "GST Number",
            placeholder: "22AAAAA0000A1Z5",
        },
        "uae" | "united arab emirates" | "ae" => TaxField {
            scheme: TaxScheme::UaeTrn,
            label: "TRN Number",
            placeholder: "100000000000003",
        },
        "saudi arabia" | "ksa" | "sa" => TaxField {
            scheme: TaxScheme::SaudiVat,
            label: "VAT Number",
            placeholder: "300000000000003",
        },
        _ => TaxField {
            scheme: TaxScheme::Generic,
            label: "Tax ID",
            placeholder: "Enter tax identification number",
        },
    }
}

/// Form state for creating or editing a vendor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorForm {
    pub company_name: String,
    #[serde(default)]
    pub contact_person_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub country: String,
    #[serde(default)]
    pub gst_number: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub street_address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub pin_code: String,
}

impl VendorForm {
    pub fn tax_field(&self) -> TaxField {
        tax_field_for_country(&self.country)
    }

    /// Collect every field error so the form can flag them all at once.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("company_name", &self.company_name),
            ("email", &self.email),
            ("country", &self.country),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationError::required(field));
            }
        }

        let email = self.email.trim();
        if !email.is_empty() && !EMAIL_RE.is_match(email) {
            errors.push(ValidationError::invalid("email", "must be a valid email address"));
        }

        let phone = self.phone.trim();
        if !phone.is_empty() && !PHONE_RE.is_match(phone) {
            errors.push(ValidationError::invalid("phone", "must be a valid phone number"));
        }

        let tax_number = self.gst_number.trim();
        if !tax_number.is_empty() {
            let field = self.tax_field();
            if !field.accepts(tax_number) {
                errors.push(ValidationError::invalid(
                    "gst_number",
                    format!("{} format is invalid (e.g. {})", field.label, field.placeholder),
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Trimmed request body for the vendor endpoints.
    pub fn to_payload(&self) -> serde_json::Value {
        let optional = |value: &str| {
            let value = value.trim();
            if value.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::Value::String(value.to_string())
            }
        };
        serde_json::json!({
            "company_name": self.company_name.trim(),
            "contact_person_name": optional(&self.contact_person_name),
            "email": self.email.trim(),
            "phone": optional(&self.phone),
            "country": self.country.trim(),
            "gst_number": optional(&self.gst_number.to_ascii_uppercase()),
            "category": optional(&self.category),
            "street_address": optional(&self.street_address),
            "city": optional(&self.city),
            "pin_code": optional(&self.pin_code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_form() -> VendorForm {
        VendorForm {
            company_name: "Shree Cement Traders".to_string(),
            email: "sales@shreecement.in".to_string(),
            country: "India".to_string(),
            phone: "+91 98450 12345".to_string(),
            gst_number: "22AAAAA0000A1Z5".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_india_uses_gst_label() {
        let field = tax_field_for_country("India");
        assert_eq!(field.label, "GST Number");
        assert_eq!(field.placeholder, "22AAAAA0000A1Z5");
        assert!(field.accepts(field.placeholder));
    }

    #[test]
    fn test_other_countries() {
        assert_eq!(tax_field_for_country("UAE").label, "TRN Number");
        assert_eq!(tax_field_for_country("Saudi Arabia").label, "VAT Number");
        assert_eq!(tax_field_for_country("Oman").label, "Tax ID");
    }

    #[test]
    fn test_valid_form_passes() {
        assert!(valid_form().validate().is_ok());
    }

    #[test]
    fn test_empty_company_name_is_reported() {
        let form = VendorForm {
            company_name: "   ".to_string(),
            ..valid_form()
        };
        let errors = form.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e == &ValidationError::required("company_name")));
    }

    #[test]
    fn test_reports_every_error() {
        let form = VendorForm {
            country: "India".to_string(),
            email: "not-an-email".to_string(),
            gst_number: "12345".to_string(),
            ..Default::default()
        };
        let errors = form.validate().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field()).collect();
        assert!(fields.contains(&"company_name"));
        assert!(fields.contains(&"email"));
        assert!(fields.contains(&"gst_number"));
    }

    #[test]
    fn test_payload_trims_and_nulls_empty_fields() {
        let payload = VendorForm {
            company_name: "  Acme  ".to_string(),
            ..valid_form()
        }
        .to_payload();
        assert_eq!(payload["company_name"], "Acme");
        assert!(payload["city"].is_null());
    }
}
