//! Built-in policy corpus for `caduceus ask`.
//!
//! Three in-memory backends with overlapping document sets, so single- and
//! multi-backend runs both have something to do.

use std::sync::Arc;

use caduceus_core::{BackendMetrics, Metadata, RequestType};
use caduceus_runtime::{InMemoryBackend, StaticMetrics};

struct PolicyDoc {
    id: &'static str,
    department: &'static str,
    document_type: &'static str,
    text: &'static str,
}

const DOCUMENTS: &[PolicyDoc] = &[
    PolicyDoc {
        id: "sepsis-antibiotics",
        department: "ED",
        document_type: "protocol",
        text: "Sepsis protocol: broad-spectrum antibiotics are administered within one hour \
               of sepsis recognition. Delays must be documented with the reason.",
    },
    PolicyDoc {
        id: "sepsis-cultures",
        department: "ED",
        document_type: "protocol",
        text: "Sepsis protocol: blood cultures are drawn before the first antibiotic dose \
               whenever this does not delay treatment.",
    },
    PolicyDoc {
        id: "sepsis-lactate",
        department: "ICU",
        document_type: "protocol",
        text: "Sepsis bundle: lactate is measured on recognition and remeasured within six \
               hours if the initial value is elevated.",
    },
    PolicyDoc {
        id: "hand-hygiene",
        department: "ICU",
        document_type: "policy",
        text: "Hand hygiene policy: staff perform hand hygiene before and after every \
               patient contact and after removing gloves.",
    },
    PolicyDoc {
        id: "central-line",
        department: "ICU",
        document_type: "guideline",
        text: "Central line guideline: insertion sites are assessed every shift and \
               dressings are changed every seven days or when soiled.",
    },
    PolicyDoc {
        id: "surgical-timeout",
        department: "OR",
        document_type: "policy",
        text: "Surgical safety policy: a time-out confirming procedure, site and consent is \
               completed before the first incision.",
    },
    PolicyDoc {
        id: "fall-prevention",
        department: "ED",
        document_type: "policy",
        text: "Fall prevention policy: every admitted adult receives a fall-risk screen \
               within four hours of arrival.",
    },
];

/// Document ids held by each backend.
const BACKENDS: &[(&str, &[&str])] = &[
    (
        "faiss",
        &[
            "sepsis-antibiotics",
            "sepsis-cultures",
            "hand-hygiene",
            "surgical-timeout",
            "fall-prevention",
        ],
    ),
    (
        "pinecone",
        &[
            "sepsis-antibiotics",
            "sepsis-lactate",
            "hand-hygiene",
            "central-line",
        ],
    ),
    (
        "weaviate",
        &[
            "sepsis-antibiotics",
            "sepsis-cultures",
            "sepsis-lactate",
            "central-line",
            "surgical-timeout",
        ],
    ),
];

pub fn backends() -> Vec<Arc<InMemoryBackend>> {
    BACKENDS
        .iter()
        .map(|(backend_id, doc_ids)| {
            let backend = DOCUMENTS
                .iter()
                .filter(|doc| doc_ids.contains(&doc.id))
                .fold(InMemoryBackend::new(*backend_id), |backend, doc| {
                    let metadata = Metadata::from([
                        ("department".to_string(), doc.department.to_string()),
                        ("document_type".to_string(), doc.document_type.to_string()),
                    ]);
                    backend.with_document(doc.id, doc.text, metadata)
                });
            Arc::new(backend)
        })
        .collect()
}

pub fn metrics() -> StaticMetrics {
    StaticMetrics::new()
        .with_fallback("faiss", BackendMetrics::new(0.74, 38.0))
        .with_fallback("pinecone", BackendMetrics::new(0.78, 95.0))
        .with_fallback("weaviate", BackendMetrics::new(0.76, 61.0))
        .with("faiss", RequestType::CompareProtocols, BackendMetrics::new(0.81, 40.0))
        .with("weaviate", RequestType::SummarizeGuideline, BackendMetrics::new(0.83, 64.0))
}
