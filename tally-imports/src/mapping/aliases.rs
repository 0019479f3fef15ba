//! Built-in field alias tables (English, Spanish, Portuguese, French)
//!
//! Aliases are stored already folded (see [`super::normalize::fold_key`]).

use crate::models::SourceType;

/// (canonical field, folded aliases)
pub type AliasTable = &'static [(&'static str, &'static [&'static str])];

const INVOICE_ALIASES: AliasTable = &[
    (
        "invoice_number",
        &[
            "invoice_number", "invoice_no", "invoice", "inv_no", "invoice_id", "number", "numero_factura",
            "no_factura", "nro_factura", "num_factura", "n_factura", "factura", "numero", "comprobante",
            "secuencial", "facture", "numero_facture", "no_facture", "nota_fiscal", "numero_nota",
        ],
    ),
    (
        "invoice_date",
        &[
            "invoice_date", "date", "issue_date", "fecha", "fecha_emision", "fecha_factura", "date_facture",
            "date_emission", "data_emissao", "data",
        ],
    ),
    ("due_date", &["due_date", "fecha_vencimiento", "vencimiento", "date_echeance", "echeance", "data_vencimento"]),
    (
        "issuer_name",
        &[
            "issuer", "issuer_name", "supplier", "vendor", "seller", "proveedor", "emisor", "razon_social",
            "fournisseur", "fornecedor", "emitente",
        ],
    ),
    (
        "issuer_tax_id",
        &[
            "issuer_tax_id", "tax_id", "vat_number", "vat_id", "tax_number", "ruc", "ruc_emisor", "nif", "cif",
            "rfc", "cuit", "nit", "rut", "cnpj", "siret", "numero_tva",
        ],
    ),
    ("customer_name", &["customer", "customer_name", "client", "client_name", "buyer", "cliente", "comprador"]),
    (
        "customer_tax_id",
        &["customer_tax_id", "client_tax_id", "buyer_tax_id", "ruc_cliente", "nif_cliente", "cedula", "identificacion"],
    ),
    (
        "net",
        &[
            "net", "net_amount", "subtotal", "sub_total", "base", "base_imponible", "amount_excl_tax",
            "total_sin_impuestos", "montant_ht", "total_ht", "valor_liquido",
        ],
    ),
    ("tax", &["tax", "tax_amount", "vat", "vat_amount", "iva", "impuesto", "igv", "tva", "icms", "total_iva"]),
    (
        "total",
        &[
            "total", "amount", "total_amount", "grand_total", "importe_total", "monto_total", "valor_total",
            "montant_ttc", "total_ttc", "importe", "monto",
        ],
    ),
    ("currency", &["currency", "moneda", "divisa", "devise", "moeda", "ccy"]),
    ("country", &["country", "pais", "pays"]),
    ("description", &["description", "concepto", "detalle", "descripcion", "libelle", "descricao"]),
];

const BANK_ALIASES: AliasTable = &[
    (
        "date",
        &[
            "date", "transaction_date", "booking_date", "posting_date", "fecha", "fecha_operacion",
            "fecha_movimiento", "fecha_transaccion", "data", "date_operation",
        ],
    ),
    ("value_date", &["value_date", "fecha_valor", "date_valeur", "data_valor"]),
    (
        "description",
        &["description", "concepto", "detalle", "descripcion", "memo", "narrative", "details", "libelle", "historico"],
    ),
    ("amount", &["amount", "importe", "monto", "valor", "montant", "transaction_amount", "cantidad"]),
    ("debit", &["debit", "debe", "cargo", "cargos", "retiro", "debito", "withdrawal", "debit_amount"]),
    ("credit", &["credit", "haber", "abono", "abonos", "deposito", "credito", "deposit", "credit_amount"]),
    ("balance", &["balance", "saldo", "solde", "running_balance"]),
    (
        "reference",
        &["reference", "referencia", "ref", "document", "documento", "numero_documento", "transaction_id", "cheque"],
    ),
    ("account", &["account", "cuenta", "iban", "account_number", "numero_cuenta", "compte", "conta"]),
    ("currency", &["currency", "moneda", "divisa", "devise", "moeda", "ccy"]),
];

const EXPENSE_ALIASES: AliasTable = &[
    ("date", &["date", "expense_date", "receipt_date", "fecha", "fecha_gasto", "data", "date_depense"]),
    (
        "vendor_name",
        &["vendor", "vendor_name", "merchant", "supplier", "proveedor", "comercio", "establecimiento", "fournisseur"],
    ),
    ("vendor_tax_id", &["vendor_tax_id", "tax_id", "ruc", "nif", "cif", "rfc", "nit", "cuit", "rut", "cnpj", "vat_number"]),
    ("description", &["description", "concepto", "detalle", "descripcion", "memo", "notes", "nota", "libelle"]),
    ("category", &["category", "categoria", "tipo_gasto", "expense_type", "cuenta_contable", "categorie"]),
    ("amount", &["amount", "total", "total_amount", "importe", "monto", "valor", "montant"]),
    ("tax", &["tax", "iva", "vat", "impuesto", "tva"]),
    ("currency", &["currency", "moneda", "divisa", "devise", "moeda", "ccy"]),
    ("payment_method", &["payment_method", "forma_pago", "metodo_pago", "medio_pago", "mode_paiement"]),
    ("country", &["country", "pais", "pays"]),
];

const PRODUCT_ALIASES: AliasTable = &[
    (
        "name",
        &[
            "name", "product", "product_name", "nombre", "producto", "descripcion", "description", "item",
            "articulo", "produit", "produto",
        ],
    ),
    ("sku", &["sku", "code", "codigo", "product_code", "item_code", "cod", "codigo_producto", "referencia", "ref"]),
    ("barcode", &["barcode", "ean", "ean13", "upc", "gtin", "codigo_barras", "codigo_de_barras"]),
    (
        "price",
        &["price", "unit_price", "sale_price", "precio", "precio_venta", "pvp", "prix", "preco", "valor_unitario"],
    ),
    ("cost", &["cost", "costo", "coste", "precio_costo", "purchase_price", "cout", "custo"]),
    (
        "stock",
        &["stock", "quantity", "qty", "cantidad", "existencias", "inventory", "on_hand", "quantite", "quantidade"],
    ),
    ("category", &["category", "categoria", "familia", "family", "rubro", "categorie"]),
    ("unit", &["unit", "unidad", "uom", "unidad_medida", "unite", "unidade"]),
    ("tax_rate", &["tax_rate", "vat_rate", "tasa_iva", "iva", "impuesto"]),
    ("location", &["location", "bodega", "almacen", "warehouse", "sucursal", "ubicacion", "store", "local"]),
];

const RECIPE_ALIASES: AliasTable = &[
    ("name", &["name", "recipe", "recipe_name", "receta", "nombre", "plato", "dish", "recette", "receita"]),
    ("ingredients", &["ingredients", "ingredientes", "lista_ingredientes", "insumos"]),
    ("ingredient", &["ingredient", "ingrediente", "insumo", "component", "componente", "ingredient_name"]),
    ("quantity", &["quantity", "qty", "cantidad", "quantite", "quantidade"]),
    ("unit", &["unit", "unidad", "uom", "unite", "unidade"]),
    ("yield", &["yield", "rendimiento", "porciones", "portions", "servings", "rinde"]),
    ("category", &["category", "categoria", "categorie"]),
];

/// Built-in alias table for a document type (generic has none)
pub fn default_aliases(source_type: SourceType) -> AliasTable {
    match source_type {
        SourceType::Invoices => INVOICE_ALIASES,
        SourceType::Bank => BANK_ALIASES,
        SourceType::Expenses => EXPENSE_ALIASES,
        SourceType::Products => PRODUCT_ALIASES,
        SourceType::Recipes => RECIPE_ALIASES,
        SourceType::Generic => &[],
    }
}

/// Canonical field names for a document type
pub fn canonical_fields(source_type: SourceType) -> Vec<&'static str> {
    default_aliases(source_type).iter().map(|(field, _)| *field).collect()
}

/// Look up the canonical field for an already folded source name
pub fn resolve_alias(source_type: SourceType, folded: &str) -> Option<&'static str> {
    default_aliases(source_type)
        .iter()
        .find(|(_, aliases)| aliases.contains(&folded))
        .map(|(field, _)| *field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::normalize::fold_key;

    #[test]
    fn test_aliases_are_prefolded() {
        for source_type in SourceType::ALL {
            for (field, aliases) in default_aliases(source_type) {
                assert_eq!(fold_key(field), *field);
                for alias in *aliases {
                    assert_eq!(fold_key(alias), *alias, "{source_type}:{field}:{alias}");
                }
            }
        }
    }

    #[test]
    fn test_alias_resolution_per_type() {
        assert_eq!(resolve_alias(SourceType::Invoices, "amount"), Some("total"));
        assert_eq!(resolve_alias(SourceType::Bank, "amount"), Some("amount"));
        assert_eq!(resolve_alias(SourceType::Bank, "saldo"), Some("balance"));
        assert_eq!(resolve_alias(SourceType::Invoices, "fecha_emision"), Some("invoice_date"));
        assert_eq!(resolve_alias(SourceType::Generic, "amount"), None);
    }
}
