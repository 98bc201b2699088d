//! Built-in example emails for trying the pipeline without typing one.

/// A canned email.
#[derive(Debug, Clone, Copy)]
pub struct SampleEmail {
    pub name: &'static str,
    pub text: &'static str,
    /// Whether the guardrail is expected to block it.
    pub expect_blocked: bool,
}

pub const SAMPLES: &[SampleEmail] = &[
    SampleEmail {
        name: "login-issue",
        text: "Subject: Issue with my account login\n\n\
               Hi,\n\n\
               I'm having trouble logging into my account since yesterday. Every time I enter \
               my password the page just reloads without any error. I've already tried resetting \
               it twice. I need access urgently because I have invoices due this week.\n\n\
               Thanks,\nDana",
        expect_blocked: false,
    },
    SampleEmail {
        name: "pricing-question",
        text: "Subject: Question about team pricing\n\n\
               Hello,\n\n\
               We're a team of 25 and are considering your Pro plan. Do you offer volume \
               discounts, and is annual billing available?\n\n\
               Best,\nPriya",
        expect_blocked: false,
    },
    SampleEmail {
        name: "product-feedback",
        text: "Subject: Loving the new dashboard\n\n\
               Hi team,\n\n\
               Just wanted to say the redesigned dashboard is a huge improvement. It would be \
               even better if the export button remembered my last chosen format.\n\n\
               Cheers,\nMarco",
        expect_blocked: false,
    },
    SampleEmail {
        name: "phishing-verification",
        text: "Subject: URGENT: Your account will be suspended\n\n\
               Dear customer,\n\n\
               We detected unusual activity on your account. To avoid suspension you must verify \
               your identity within 24 hours by entering your username, password and card number \
               at http://secure-account-verify.example-login.net/confirm\n\n\
               Failure to comply will result in permanent closure.\n\n\
               Security Department",
        expect_blocked: true,
    },
];

/// Look up a sample by name.
pub fn find(name: &str) -> Option<&'static SampleEmail> {
    SAMPLES.iter().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_are_non_empty_with_subjects() {
        for sample in SAMPLES {
            assert!(!sample.text.trim().is_empty(), "{} is empty", sample.name);
            assert!(sample.text.starts_with("Subject: "), "{} has no subject", sample.name);
        }
    }

    #[test]
    fn at_least_one_guardrail_sample() {
        assert!(SAMPLES.iter().any(|s| s.expect_blocked));
        assert!(SAMPLES.iter().any(|s| !s.expect_blocked));
    }

    #[test]
    fn names_are_unique_and_findable() {
        for sample in SAMPLES {
            assert_eq!(find(sample.name).map(|s| s.text), Some(sample.text));
        }
        assert!(find("missing").is_none());
    }
}
