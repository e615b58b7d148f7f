use lazy_static::lazy_static;
use std::collections::HashMap;
use tracing::warn;

/// Static table relationship graph: an arena of vertex names plus an
/// adjacency map of directed edges, each edge carrying the literal join
/// clause anchored on its source table. Built once at start-up and shared by
/// reference.
pub struct JoinGraph {
    vertices: Vec<String>,
    index: HashMap<String, usize>,
    edges: HashMap<(usize, usize), String>,
}

lazy_static! {
    /// The construction-business schema graph.
    pub static ref BUSINESS_GRAPH: JoinGraph = JoinGraph::business_schema();

    /// French domain vocabulary resolved to canonical table names before
    /// validation against the graph. Keys are accent-folded.
    static ref TABLE_SYNONYMS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("projet", "projects");
        m.insert("projets", "projects");
        m.insert("client", "clients");
        m.insert("devis", "quotations");
        m.insert("facture", "invoices");
        m.insert("factures", "invoices");
        m.insert("employe", "staff");
        m.insert("employes", "staff");
        m.insert("personnel", "staff");
        m.insert("adresse", "addresses");
        m.insert("adresses", "addresses");
        m.insert("etape", "stages");
        m.insert("etapes", "stages");
        m.insert("paiement", "payments");
        m.insert("paiements", "payments");
        m.insert("statut", "ref_status");
        m.insert("produit", "quotation_products");
        m.insert("produits", "quotation_products");
        m
    };
}

impl JoinGraph {
    fn new() -> Self {
        Self {
            vertices: Vec::new(),
            index: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    fn add_vertex(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.vertices.len();
        self.vertices.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    fn add_edge(&mut self, from: &str, to: &str, clause: &str) {
        let f = self.add_vertex(from);
        let t = self.add_vertex(to);
        self.edges.insert((f, t), clause.to_string());
    }

    /// Build the static schema graph. Edge clauses are anchored on the edge's
    /// source table; reverse lookups rewrite the join target (see
    /// [`resolve_join`](Self::resolve_join)).
    pub fn business_schema() -> Self {
        let mut g = Self::new();

        g.add_edge("projects", "stages", "JOIN stages ON projects.id = stages.project_id");
        g.add_edge("projects", "clients", "JOIN clients ON projects.client_id = clients.id");
        g.add_edge("projects", "ref_status", "JOIN ref_status ON projects.status = ref_status.id");
        g.add_edge("projects", "quotations", "JOIN quotations ON projects.id = quotations.project_id");
        g.add_edge("projects", "invoices", "JOIN invoices ON projects.id = invoices.project_id");
        g.add_edge("projects", "addresses", "JOIN addresses ON projects.address_id = addresses.id");
        g.add_edge(
            "projects",
            "timesheet_entries",
            "JOIN timesheet_entries ON projects.id = timesheet_entries.project_id",
        );

        g.add_edge("clients", "projects", "JOIN projects ON clients.id = projects.client_id");
        g.add_edge("clients", "addresses", "JOIN addresses ON clients.address_id = addresses.id");

        g.add_edge("quotations", "projects", "JOIN projects ON quotations.project_id = projects.id");
        g.add_edge(
            "quotations",
            "ref_quotation_status",
            "JOIN ref_quotation_status ON quotations.status = ref_quotation_status.id",
        );
        g.add_edge(
            "quotations",
            "quotation_products",
            "JOIN quotation_products ON quotations.id = quotation_products.quotation_id",
        );

        g.add_edge("invoices", "projects", "JOIN projects ON invoices.project_id = projects.id");
        g.add_edge("invoices", "ref_status", "JOIN ref_status ON invoices.status = ref_status.id");
        g.add_edge("invoices", "payments", "JOIN payments ON invoices.id = payments.invoice_id");
        g.add_edge(
            "invoices",
            "invoice_items",
            "JOIN invoice_items ON invoices.id = invoice_items.invoice_id",
        );

        g.add_edge("stages", "projects", "JOIN projects ON stages.project_id = projects.id");
        g.add_edge("stages", "ref_status", "JOIN ref_status ON stages.status = ref_status.id");

        g.add_edge(
            "staff",
            "timesheet_entries",
            "JOIN timesheet_entries ON staff.id = timesheet_entries.staff_id",
        );

        g.add_edge(
            "timesheet_entries",
            "staff",
            "JOIN staff ON timesheet_entries.staff_id = staff.id",
        );
        g.add_edge(
            "timesheet_entries",
            "projects",
            "JOIN projects ON timesheet_entries.project_id = projects.id",
        );

        g.add_edge("ref_status", "projects", "JOIN projects ON ref_status.id = projects.status");
        g.add_edge("ref_status", "invoices", "JOIN invoices ON ref_status.id = invoices.status");
        g.add_edge("ref_status", "stages", "JOIN stages ON ref_status.id = stages.status");

        g.add_edge("addresses", "clients", "JOIN clients ON addresses.id = clients.address_id");
        g.add_edge("addresses", "projects", "JOIN projects ON addresses.id = projects.address_id");

        g
    }

    /// Whether `table` belongs to the schema's vertex set.
    pub fn contains(&self, table: &str) -> bool {
        self.index.contains_key(table)
    }

    /// All vertex names.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.vertices.iter().map(String::as_str)
    }

    /// Resolve the clause joining `secondary` onto `primary`: direct edge
    /// first, then the reverse edge with its join target renamed by literal
    /// token substitution. None when the tables are unrelated.
    pub fn resolve_join(&self, primary: &str, secondary: &str) -> Option<String> {
        let p = *self.index.get(primary)?;
        let s = *self.index.get(secondary)?;
        if let Some(clause) = self.edges.get(&(p, s)) {
            return Some(clause.clone());
        }
        if let Some(reverse) = self.edges.get(&(s, p)) {
            return Some(reverse.replace(
                &format!("JOIN {} ON", primary),
                &format!("JOIN {} ON", secondary),
            ));
        }
        None
    }

    /// Fold joins for every secondary table onto the anchor table, skipping
    /// tables already present in the accumulated SQL and degrading to an
    /// explicit CROSS JOIN when no relation is known.
    pub fn append_joins(&self, base_sql: &str, primary: &str, secondaries: &[String]) -> String {
        let mut sql = base_sql.to_string();
        for table in secondaries {
            if is_table_already_joined(&sql, table) {
                continue;
            }
            match self.resolve_join(primary, table) {
                Some(clause) => {
                    sql.push(' ');
                    sql.push_str(&clause);
                }
                None => {
                    warn!("No known relation between {} and {}, using CROSS JOIN", primary, table);
                    sql.push_str(" CROSS JOIN ");
                    sql.push_str(table);
                }
            }
        }
        sql
    }
}

/// A table counts as already joined when its name appears as a standalone
/// word in the SQL built so far.
pub fn is_table_already_joined(sql: &str, table: &str) -> bool {
    let padded = format!(" {} ", sql.to_lowercase());
    padded.contains(&format!(" {} ", table.to_lowercase()))
}

/// Map a French domain name onto its canonical table name. Unknown names
/// pass through accent-folded for later validation against the graph.
pub fn resolve_table_name(raw: &str) -> String {
    let folded = crate::normalize::normalize(raw);
    match TABLE_SYNONYMS.get(folded.as_str()) {
        Some(canonical) => (*canonical).to_string(),
        None => folded,
    }
}
