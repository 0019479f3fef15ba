//! Domain keyword vocabularies (folded) used by the dispatcher and the
//! heuristic classifier

use std::collections::BTreeMap;

use crate::mapping::normalize::{fold_key, fold_tokens};
use crate::models::SourceType;

const BANK: &[&str] = &[
    "iban", "swift", "bic", "saldo", "balance", "solde", "debit", "credit", "debe", "haber", "cargo",
    "abono", "debito", "credito", "deposit", "withdrawal", "deposito", "retiro", "movimiento",
    "movimientos", "transaction", "transferencia", "transfer", "statement", "extracto", "value_date",
    "fecha_valor", "account", "cuenta", "libelle", "historico",
];

const INVOICES: &[&str] = &[
    "invoice", "invoice_number", "factura", "facture", "nota_fiscal", "subtotal", "base_imponible",
    "iva", "vat", "tva", "igv", "tax", "impuesto", "ruc", "nif", "cif", "rfc", "cuit", "cnpj",
    "customer", "cliente", "client", "due_date", "vencimiento", "comprobante", "secuencial",
    "emisor", "issuer", "net", "montant_ht", "total_ttc",
];

const EXPENSES: &[&str] = &[
    "expense", "expenses", "gasto", "gastos", "receipt", "recibo", "ticket", "merchant", "comercio",
    "establecimiento", "category", "categoria", "reimbursement", "reembolso", "payment_method",
    "forma_pago", "metodo_pago", "vendor", "proveedor", "depense", "despesa",
];

const PRODUCTS: &[&str] = &[
    "sku", "barcode", "ean", "ean13", "upc", "gtin", "price", "precio", "pvp", "prix", "preco",
    "stock", "inventory", "existencias", "product", "producto", "produit", "produto", "unit",
    "unidad", "cost", "costo", "coste", "brand", "marca", "codigo_barras", "articulo",
];

const RECIPES: &[&str] = &[
    "recipe", "receta", "recette", "receita", "ingredient", "ingrediente", "insumo", "yield",
    "rendimiento", "porciones", "portions", "servings", "plato", "dish",
];

/// Keyword list for a document type (generic has none)
pub fn keywords(source_type: SourceType) -> &'static [&'static str] {
    match source_type {
        SourceType::Bank => BANK,
        SourceType::Invoices => INVOICES,
        SourceType::Expenses => EXPENSES,
        SourceType::Products => PRODUCTS,
        SourceType::Recipes => RECIPES,
        SourceType::Generic => &[],
    }
}

/// True when a folded cell/header matches a keyword, either whole or by token
pub fn matches_keyword(folded: &str, keyword: &str) -> bool {
    folded == keyword || fold_tokens(folded).iter().any(|t| t == keyword)
}

/// Count, per document type, how many texts hit at least one keyword
pub fn keyword_hits<'a, I>(texts: I) -> BTreeMap<SourceType, usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hits: BTreeMap<SourceType, usize> =
        SourceType::SPECIFIC.iter().map(|t| (*t, 0)).collect();
    for text in texts {
        let folded = fold_key(text);
        if folded.is_empty() {
            continue;
        }
        for source_type in SourceType::SPECIFIC {
            if keywords(source_type).iter().any(|kw| matches_keyword(&folded, kw)) {
                *hits.entry(source_type).or_insert(0) += 1;
            }
        }
    }
    hits
}

/// The type with strictly the most hits, if any hit at all
pub fn dominant(hits: &BTreeMap<SourceType, usize>) -> Option<SourceType> {
    let mut ranked: Vec<(SourceType, usize)> = hits.iter().map(|(t, n)| (*t, *n)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    match ranked.as_slice() {
        [(top, n), rest @ ..] if *n > 0 => {
            if rest.first().map(|(_, m)| m == n).unwrap_or(false) {
                None
            } else {
                Some(*top)
            }
        }
        _ => None,
    }
}

/// Infer a document type from column headers alone
pub fn detect_doc_type<'a, I>(headers: I) -> Option<SourceType>
where
    I: IntoIterator<Item = &'a str>,
{
    dominant(&keyword_hits(headers))
}
