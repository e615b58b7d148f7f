use async_trait::async_trait;
use requetier::catalog::{QueryCatalog, CATALOG_COLLECTION};
use requetier::error::{EngineError, Result};
use requetier::executor::SqlProbe;
use requetier::intent::AgentKind;
use requetier::llm::IntentGenerator;
use requetier::resolver::{learned_id, ResolvedSource, Resolver, Thresholds, PROMPT_COLLECTION};
use requetier::vector_store::{InMemoryVectorStore, VectorStore};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Generator that fails the test if any tier reaches it.
struct RefusingGenerator;

#[async_trait]
impl IntentGenerator for RefusingGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(EngineError::Generation(
            "the cache tiers should have answered this question".to_string(),
        ))
    }
}

/// Generator with a canned analysis and an invocation counter.
struct ScriptedGenerator {
    payload: String,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn new(payload: &str) -> Self {
        Self {
            payload: payload.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IntentGenerator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.payload.clone())
    }
}

/// Probe that declares every query unplannable.
struct RejectingProbe {
    calls: AtomicUsize,
}

#[async_trait]
impl SqlProbe for RejectingProbe {
    async fn explain(&self, _query: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }
}

/// Write a single-file catalog under a scratch directory.
fn write_catalog(name: &str, queries: serde_json::Value) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "requetier-flow-{}-{}",
        name,
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    let payload = json!({ "queries": queries });
    fs::write(
        dir.join("fixtures.query.json"),
        serde_json::to_vec_pretty(&payload).unwrap(),
    )
    .unwrap();
    dir
}

async fn seeded_resolver(
    name: &str,
    queries: serde_json::Value,
    generator: Arc<dyn IntentGenerator>,
) -> (Arc<InMemoryVectorStore>, Resolver) {
    let catalog = Arc::new(QueryCatalog::open(write_catalog(name, queries)).unwrap());
    let store = Arc::new(InMemoryVectorStore::new());
    let resolver = Resolver::new(store.clone(), generator, catalog);
    resolver.seed_catalog().await.unwrap();
    (store, resolver)
}

#[tokio::test]
async fn exact_variant_resolves_from_cache_without_generation() {
    let queries = json!([{
        "id": "projects_active",
        "questions": [
            "Quels sont les projets en cours ?",
            "Liste des projets en cours",
            "Quels chantiers sont actifs en ce moment ?"
        ],
        "sql": "SELECT projects.name, projects.start_date, projects.end_date FROM projects JOIN ref_status ON projects.status = ref_status.id WHERE ref_status.code = 'en_cours'",
        "description": "Liste des projets dont le statut est en cours"
    }]);
    let (store, resolver) =
        seeded_resolver("exact", queries, Arc::new(RefusingGenerator)).await;

    // same question, different casing and no punctuation
    let answer = resolver
        .resolve("quels sont les projets en cours")
        .await
        .unwrap();

    assert_eq!(answer.source, ResolvedSource::Exact);
    assert!(answer.validated);
    assert_eq!(answer.similarity, Some(1.0));
    assert!(answer.matched_id.unwrap().starts_with("projects_active"));
    assert!(answer.final_query.contains("ref_status.code = 'en_cours'"));
    assert_eq!(
        answer.intent.reformulated_question,
        "Liste des projets dont le statut est en cours"
    );
    // cache hits are not journaled
    assert_eq!(store.count(PROMPT_COLLECTION).await.unwrap(), 0);
}

#[tokio::test]
async fn temporal_mismatch_forces_fresh_generation() {
    let queries = json!([{
        "id": "staff_schedule_tomorrow",
        "questions": [
            "Qui travaille demain ?",
            "Planning du personnel pour demain",
            "Quels employés sont sur les chantiers demain ?"
        ],
        "sql": "SELECT staff.firstname, staff.lastname FROM timesheet_entries JOIN staff ON timesheet_entries.staff_id = staff.id WHERE timesheet_entries.date = CURRENT_DATE + INTERVAL '1 day'",
        "description": "Personnel planifié sur les chantiers demain"
    }]);
    let generator = Arc::new(ScriptedGenerator::new(
        r#"{
            "Question reformulée": "Liste du personnel planifié la semaine prochaine",
            "Agent": "querybuilder",
            "Tables concernées": ["staff", "timesheet_entries"],
            "Champs à afficher": ["staff.firstname", "staff.lastname"],
            "Conditions et filtres": "EXTRACT(WEEK FROM timesheet_entries.date) = EXTRACT(WEEK FROM CURRENT_DATE) + 1",
            "Opérations": []
        }"#,
    ));
    let (store, resolver) = seeded_resolver("temporal", queries, generator.clone()).await;

    // "demain" in the cache, "la semaine prochaine" in the question: the
    // temporal guard must keep every cached entry out of reach
    let question = "Qui travaille la semaine prochaine ?";
    let answer = resolver.resolve(question).await.unwrap();

    assert_eq!(answer.source, ResolvedSource::Generated);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert!(answer.validated);
    assert!(answer.matched_id.is_none());
    assert_eq!(
        answer.final_query,
        "SELECT staff.firstname, staff.lastname FROM staff \
         JOIN timesheet_entries ON staff.id = timesheet_entries.staff_id \
         WHERE EXTRACT(WEEK FROM timesheet_entries.date) = EXTRACT(WEEK FROM CURRENT_DATE) + 1"
    );

    // the validated answer entered the cache under a learned id
    let cached = store.get_all(CATALOG_COLLECTION).await.unwrap();
    assert_eq!(cached.len(), 4);
    assert!(cached.ids.contains(&learned_id(question)));
    assert_eq!(store.count(PROMPT_COLLECTION).await.unwrap(), 1);
}

#[tokio::test]
async fn close_candidates_are_settled_by_disambiguation() {
    let queries = json!([
        {
            "id": "quotations_total_amount",
            "questions": [
                "Quel est le montant total des devis du mois ?",
                "Montant cumulé des devis émis ce mois-ci"
            ],
            "sql": "SELECT SUM(quotations.total_ht) AS total_ht FROM quotations WHERE EXTRACT(MONTH FROM quotations.issue_date) = EXTRACT(MONTH FROM CURRENT_DATE)",
            "description": "Somme totale des devis du mois en cours"
        },
        {
            "id": "quotations_amount_by_client",
            "questions": [
                "Montant des devis par client",
                "Détail des devis de chaque client"
            ],
            "sql": "SELECT clients.name, SUM(quotations.total_ht) AS total_ht FROM quotations JOIN clients ON quotations.client_id = clients.id GROUP BY clients.name",
            "description": "Détail des devis par client, un montant par client"
        },
        {
            "id": "quotations_accepted_month",
            "questions": [
                "Quels devis ont été acceptés ce mois-ci ?",
                "Devis acceptés du mois en cours"
            ],
            "sql": "SELECT quotations.id, quotations.total_ht FROM quotations WHERE quotations.status = (SELECT id FROM ref_quotation_status WHERE code = 'accepté')",
            "description": "Devis acceptés durant le mois en cours"
        }
    ]);
    let catalog = Arc::new(QueryCatalog::open(write_catalog("disambiguate", queries)).unwrap());
    let store = Arc::new(InMemoryVectorStore::new());
    // widen the disambiguation window so the quotation entries land in it
    let resolver = Resolver::new(store.clone(), Arc::new(RefusingGenerator), catalog)
        .with_thresholds(Thresholds {
            accept: 0.9,
            disambiguate: 0.3,
            gap: 0.5,
            ..Thresholds::default()
        });
    resolver.seed_catalog().await.unwrap();

    // "cumulé" must route to the aggregated entry, not the per-client listing
    let answer = resolver
        .resolve("Montant cumulé des devis du mois")
        .await
        .unwrap();

    assert_eq!(answer.source, ResolvedSource::Disambiguated);
    assert!(answer
        .matched_id
        .unwrap()
        .starts_with("quotations_total_amount"));
    assert!(answer.final_query.contains("SUM(quotations.total_ht)"));
    assert!(!answer.final_query.contains("GROUP BY"));
}

#[tokio::test]
async fn unknown_table_yields_answer_without_sql_and_no_cache_entry() {
    let generator = Arc::new(ScriptedGenerator::new(
        r#"{
            "Question reformulée": "Liste du stock restant disponible dans l'entrepôt principal",
            "Agent": "querybuilder",
            "Tables concernées": ["warehouse_inventory"],
            "Champs à afficher": ["warehouse_inventory.item"],
            "Conditions et filtres": "warehouse_inventory.quantity > 0"
        }"#,
    ));
    let (store, resolver) = seeded_resolver("unknown", json!([]), generator.clone()).await;

    let answer = resolver
        .resolve("Quel est le stock restant en entrepôt ?")
        .await
        .unwrap();

    assert_eq!(answer.source, ResolvedSource::Generated);
    assert!(answer.final_query.is_empty());
    assert!(answer.validated);
    // no SQL, nothing to cache; the question is still journaled
    assert_eq!(store.count(CATALOG_COLLECTION).await.unwrap(), 0);
    assert_eq!(store.count(PROMPT_COLLECTION).await.unwrap(), 1);
}

#[tokio::test]
async fn shipped_catalog_seeds_once_and_is_idempotent() {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("queries");
    let catalog = Arc::new(QueryCatalog::open(dir).unwrap());
    let store = Arc::new(InMemoryVectorStore::new());
    let resolver = Resolver::new(store.clone(), Arc::new(RefusingGenerator), catalog.clone());

    let seeded = resolver.seed_catalog().await.unwrap();
    assert!(seeded > 0);
    assert_eq!(store.count(CATALOG_COLLECTION).await.unwrap(), seeded);

    // second pass finds every id already present
    assert_eq!(resolver.seed_catalog().await.unwrap(), 0);
    assert_eq!(store.count(CATALOG_COLLECTION).await.unwrap(), seeded);

    let all = store.get_all(CATALOG_COLLECTION).await.unwrap();
    assert!(all
        .ids
        .iter()
        .any(|id| id.starts_with("staff_schedule_tomorrow")));

    // parameterized entries carry their placeholder names in metadata
    let (_, metadata) = all
        .ids
        .iter()
        .zip(&all.metadatas)
        .find(|(id, _)| id.starts_with("projects_for_client"))
        .expect("parameterized fixture entry");
    assert_eq!(metadata["parameters"], json!(["CLIENT_ID"]));
}

#[tokio::test]
async fn unplannable_cache_hit_is_dropped_and_regenerated() {
    let queries = json!([{
        "id": "clients_all",
        "questions": ["Liste de tous les clients"],
        "sql": "SELECT clients.name, clients.email FROM clients ORDER BY clients.name",
        "description": "Liste complète des clients"
    }]);
    let generator = Arc::new(ScriptedGenerator::new(
        r#"{
            "Question reformulée": "Liste complète de tous les clients enregistrés",
            "Agent": "querybuilder",
            "Tables concernées": ["clients"],
            "Champs à afficher": ["clients.name"],
            "Conditions et filtres": ""
        }"#,
    ));
    let probe = Arc::new(RejectingProbe {
        calls: AtomicUsize::new(0),
    });
    let catalog = Arc::new(QueryCatalog::open(write_catalog("stale", queries)).unwrap());
    let store = Arc::new(InMemoryVectorStore::new());
    let resolver = Resolver::new(store.clone(), generator.clone(), catalog)
        .with_probe(probe.clone());
    resolver.seed_catalog().await.unwrap();

    let answer = resolver.resolve("liste de tous les clients").await.unwrap();

    // the exact hit failed the probe, was evicted, and the question fell
    // through to generation
    assert!(probe.calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(answer.source, ResolvedSource::Generated);
    assert_eq!(answer.final_query, "SELECT clients.name FROM clients");

    let cached = store.get_all(CATALOG_COLLECTION).await.unwrap();
    assert!(!cached.ids.iter().any(|id| id.starts_with("clients_all")));
    assert!(cached.ids.iter().any(|id| id.starts_with("model_")));
}

#[tokio::test]
async fn parameterized_hit_skips_probe_and_reports_placeholders() {
    let queries = json!([{
        "id": "projects_for_client",
        "questions": ["Quels sont les projets d'un client donné ?"],
        "sql": "SELECT projects.name FROM projects WHERE projects.client_id = [CLIENT_ID]",
        "description": "Projets rattachés à un client précis",
        "parameters": ["CLIENT_ID"]
    }]);
    let probe = Arc::new(RejectingProbe {
        calls: AtomicUsize::new(0),
    });
    let catalog = Arc::new(QueryCatalog::open(write_catalog("placeholder", queries)).unwrap());
    let store = Arc::new(InMemoryVectorStore::new());
    let resolver = Resolver::new(store.clone(), Arc::new(RefusingGenerator), catalog)
        .with_probe(probe.clone());
    resolver.seed_catalog().await.unwrap();

    let answer = resolver
        .resolve("quels sont les projets d'un client donné")
        .await
        .unwrap();

    // a query with placeholders cannot be planned, so the probe never runs
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    assert_eq!(answer.source, ResolvedSource::Exact);
    assert_eq!(answer.required_parameters, vec!["CLIENT_ID"]);
    assert!(answer.final_query.contains("[CLIENT_ID]"));
}

#[tokio::test]
async fn workflow_intent_is_returned_without_sql_and_never_cached() {
    let generator = Arc::new(ScriptedGenerator::new(
        r#"{
            "Question reformulée": "Envoyer le devis en attente par email au client Martin",
            "Agent": "workflow",
            "Action à effectuer": "send_email",
            "Entités concernées": ["quotations", "clients"],
            "Paramètres nécessaires": ["client_id", "quotation_id"]
        }"#,
    ));
    let (store, resolver) = seeded_resolver("workflow", json!([]), generator.clone()).await;

    let answer = resolver
        .resolve("Envoie le devis par email au client Martin")
        .await
        .unwrap();

    assert_eq!(answer.source, ResolvedSource::Generated);
    assert_eq!(answer.intent.agent, AgentKind::Workflow);
    assert_eq!(answer.intent.action.as_deref(), Some("send_email"));
    assert!(answer.final_query.is_empty());
    assert!(answer.validated);
    assert_eq!(store.count(CATALOG_COLLECTION).await.unwrap(), 0);
    assert_eq!(store.count(PROMPT_COLLECTION).await.unwrap(), 1);
}
